//! Ambient configuration
//!
//! The immutable option snapshot shared by reference across transactions.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protection::{Format, TokenKind};

/// Endpoint wire paths, defaulting under `/connect/*` and
/// `/.well-known/*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointPaths {
    pub authorization: String,
    pub token: String,
    pub introspection: String,
    pub revocation: String,
    pub device: String,
    pub verification: String,
    pub userinfo: String,
    pub logout: String,
    pub configuration: String,
    pub jwks: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            authorization: "/connect/authorize".to_string(),
            token: "/connect/token".to_string(),
            introspection: "/connect/introspect".to_string(),
            revocation: "/connect/revoke".to_string(),
            device: "/connect/device".to_string(),
            verification: "/connect/verify".to_string(),
            userinfo: "/connect/userinfo".to_string(),
            logout: "/connect/logout".to_string(),
            configuration: "/.well-known/openid-configuration".to_string(),
            jwks: "/.well-known/jwks.json".to_string(),
        }
    }
}

/// The immutable, `Arc`-shared configuration snapshot consumed by every
/// handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthOptions {
    pub issuer: String,
    pub paths: EndpointPaths,

    pub enabled_grant_types: Vec<String>,
    pub require_pkce: bool,
    pub offline_access_requires_refresh_grant: bool,

    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    pub identity_token_lifetime: Duration,
    pub authorization_code_lifetime: Duration,
    pub device_code_lifetime: Duration,

    /// Bounded window after a refresh token's redemption during which it
    /// may be reused without triggering cascade revocation.
    pub refresh_token_reuse_leeway: Duration,
    pub rolling_refresh_tokens: bool,

    pub registered_scopes: Vec<String>,
    pub token_format: HashMap<TokenKind, Format>,
    pub reference_token_kinds: Vec<TokenKind>,

    /// Whether an unknown/non-valid token on the revocation endpoint is
    /// reported as `invalid_token` or folded into an empty 200.
    /// Preserved as a flag rather than picking one.
    pub normalize_revocation_errors: bool,

    /// Whether identity-token re-issuance on refresh is unconditional or
    /// gated by the presence of the `openid` scope. Gated, matching the
    /// OIDC core profile.
    pub reissue_identity_token_requires_openid_scope: bool,

    pub application_cache_capacity: usize,
}

impl Default for OAuthOptions {
    fn default() -> Self {
        let mut token_format = HashMap::new();
        for kind in [
            TokenKind::AccessToken,
            TokenKind::RefreshToken,
            TokenKind::IdentityToken,
            TokenKind::AuthorizationCode,
            TokenKind::DeviceCode,
            TokenKind::UserCode,
            TokenKind::State,
        ] {
            token_format.insert(kind, Format::Jwt);
        }

        Self {
            issuer: "https://issuer.example".to_string(),
            paths: EndpointPaths::default(),
            enabled_grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
                "client_credentials".to_string(),
                "password".to_string(),
                "urn:ietf:params:oauth:grant-type:device_code".to_string(),
            ],
            require_pkce: true,
            offline_access_requires_refresh_grant: true,
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(60 * 60 * 24 * 14),
            identity_token_lifetime: Duration::from_secs(3600),
            authorization_code_lifetime: Duration::from_secs(300),
            device_code_lifetime: Duration::from_secs(600),
            refresh_token_reuse_leeway: Duration::from_secs(5),
            rolling_refresh_tokens: true,
            registered_scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string(), "phone".to_string(), "address".to_string(), "offline_access".to_string()],
            token_format,
            reference_token_kinds: Vec::new(),
            normalize_revocation_errors: false,
            reissue_identity_token_requires_openid_scope: true,
            application_cache_capacity: 1024,
        }
    }
}

impl OAuthOptions {
    #[must_use]
    pub fn format_for(&self, kind: TokenKind) -> Format {
        self.token_format.get(&kind).copied().unwrap_or(Format::Jwt)
    }

    #[must_use]
    pub fn is_reference_kind(&self, kind: TokenKind) -> bool {
        self.reference_token_kinds.contains(&kind)
    }

    #[must_use]
    pub fn grant_type_enabled(&self, grant_type: &str) -> bool {
        self.enabled_grant_types.iter().any(|g| g == grant_type)
    }
}
