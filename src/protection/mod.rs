//! Token protection layer
//!
//! Generates and validates the seven token kinds in two interchangeable
//! formats, with optional reference-token indirection through a
//! persistent store.

pub mod jwt;
pub mod keyring;
pub mod opaque;
pub mod purpose;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, OAuthResult};
use purpose::{Locality, PurposeVector};

/// The fixed 5-character prefix identifying the opaque format cheaply,
/// without attempting decryption.
pub const OPAQUE_PREFIX: &str = "CfDJ8";

/// The seven token kinds the protection layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
    IdentityToken,
    AuthorizationCode,
    DeviceCode,
    UserCode,
    State,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdentityToken => "id_token",
            Self::AuthorizationCode => "authorization_code",
            Self::DeviceCode => "device_code",
            Self::UserCode => "user_code",
            Self::State => "state",
        }
    }

    /// The fixed priority order used when the acceptable-kind set is
    /// empty or contains more than one kind.
    #[must_use]
    pub fn priority_order() -> &'static [TokenKind] {
        &[
            Self::AccessToken,
            Self::RefreshToken,
            Self::AuthorizationCode,
            Self::DeviceCode,
            Self::UserCode,
        ]
    }
}

/// The claims bundle carried by a validated or to-be-minted token.
/// Immutable once sealed: construct through
/// [`PrincipalBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub subject: Option<String>,
    pub audiences: Vec<String>,
    pub presenters: Vec<String>,
    pub resources: Vec<String>,
    pub scopes: Vec<String>,
    pub token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: TokenKind,
    pub redirect_uri: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub authorization_id: Option<String>,
    pub nonce: Option<String>,
    pub host_properties: serde_json::Value,
    /// Additional named, possibly multi-valued claims beyond the
    /// well-known fields above.
    pub claims: HashMap<String, Vec<String>>,
}

impl Principal {
    #[must_use]
    pub fn builder(token_type: TokenKind) -> PrincipalBuilder {
        PrincipalBuilder::new(token_type)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&[String]> {
        self.claims.get(name).map(Vec::as_slice)
    }
}

/// Builder for [`Principal`]; the only way to construct one, so a sealed
/// principal can never be partially built.
#[derive(Debug, Clone)]
pub struct PrincipalBuilder {
    inner: Principal,
}

impl PrincipalBuilder {
    #[must_use]
    pub fn new(token_type: TokenKind) -> Self {
        Self {
            inner: Principal {
                subject: None,
                audiences: Vec::new(),
                presenters: Vec::new(),
                resources: Vec::new(),
                scopes: Vec::new(),
                token_id: uuid::Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                expires_at: None,
                token_type,
                redirect_uri: None,
                code_challenge: None,
                code_challenge_method: None,
                authorization_id: None,
                nonce: None,
                host_properties: serde_json::Value::Null,
                claims: HashMap::new(),
            },
        }
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.inner.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn audiences(mut self, audiences: Vec<String>) -> Self {
        self.inner.audiences = audiences;
        self
    }

    #[must_use]
    pub fn presenters(mut self, presenters: Vec<String>) -> Self {
        self.inner.presenters = presenters;
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: Vec<String>) -> Self {
        self.inner.resources = resources;
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.inner.scopes = scopes;
        self
    }

    #[must_use]
    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.inner.token_id = token_id.into();
        self
    }

    #[must_use]
    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.inner.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.inner.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn code_challenge(mut self, challenge: impl Into<String>, method: impl Into<String>) -> Self {
        self.inner.code_challenge = Some(challenge.into());
        self.inner.code_challenge_method = Some(method.into());
        self
    }

    #[must_use]
    pub fn authorization_id(mut self, authorization_id: impl Into<String>) -> Self {
        self.inner.authorization_id = Some(authorization_id.into());
        self
    }

    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.inner.nonce = Some(nonce.into());
        self
    }

    #[must_use]
    pub fn claim(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.inner.claims.insert(name.into(), values);
        self
    }

    /// Seal the principal: from this point it is immutable.
    #[must_use]
    pub fn build(self) -> Principal {
        self.inner
    }
}

/// The two interchangeable wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Jwt,
    Opaque,
}

/// Resolves a reference token id to the stored payload bytes for its
/// kind. Implemented by the
/// store-backed adapters in [`crate::store`].
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn resolve_payload(&self, kind: TokenKind, reference_id: &str) -> OAuthResult<Vec<u8>>;

    /// Whether tokens of `kind` should be minted as references rather
    /// than inline.
    fn is_reference_kind(&self, kind: TokenKind) -> bool;

    /// Persist a newly minted token's payload, returning the reference
    /// id to hand back to the caller.
    async fn store_payload(&self, kind: TokenKind, payload: Vec<u8>) -> OAuthResult<String>;
}

/// Orchestrates JWT and opaque formats behind one validation/generation
/// surface.
pub struct Protector {
    pub jwt: jwt::JwtFormat,
    pub opaque: opaque::OpaqueFormat,
}

impl Protector {
    #[must_use]
    pub fn new(jwt: jwt::JwtFormat, opaque: opaque::OpaqueFormat) -> Self {
        Self { jwt, opaque }
    }

    /// Mint an inline token string for `principal` in the requested
    /// format.
    pub fn protect(&self, principal: &Principal, format: Format) -> OAuthResult<String> {
        match format {
            Format::Jwt => self.jwt.encode(principal),
            Format::Opaque => {
                let vector = PurposeVector::new("server", principal.token_type, Locality::Inline);
                self.opaque.encode_token(principal, &vector)
            }
        }
    }

    /// Mint a reference token: the payload is protected inline and
    /// handed to `resolver` for storage; the string returned to the
    /// caller is a distinct, reference-purpose opaque token wrapping the
    /// returned reference id.
    pub async fn protect_reference(
        &self,
        principal: &Principal,
        resolver: &dyn ReferenceResolver,
    ) -> OAuthResult<String> {
        let inline_vector = PurposeVector::new("server", principal.token_type, Locality::Inline);
        let payload = self.opaque.encode_payload(principal, &inline_vector)?;
        let reference_id = resolver.store_payload(principal.token_type, payload).await?;
        let reference_vector = PurposeVector::new("server", principal.token_type, Locality::Reference);
        self.opaque.encode_reference(&reference_id, &reference_vector)
    }

    /// Validate a presented token against a set of acceptable kinds,
    /// trying the hinted kind first when one is given.
    pub async fn validate(
        &self,
        token: &str,
        acceptable: &[TokenKind],
        hint: Option<TokenKind>,
        resolver: Option<&dyn ReferenceResolver>,
    ) -> OAuthResult<Principal> {
        let candidates = candidate_kinds(acceptable, hint);
        let try_opaque_first = token.starts_with(OPAQUE_PREFIX);

        if try_opaque_first {
            if let Ok(principal) = self.try_opaque(token, &candidates, resolver).await {
                return Ok(principal);
            }
        } else if let Ok(principal) = self.try_jwt(token, &candidates) {
            return Ok(principal);
        }

        // Fallback to the other format.
        if try_opaque_first {
            self.try_jwt(token, &candidates)
        } else {
            self.try_opaque(token, &candidates, resolver).await
        }
    }

    fn try_jwt(&self, token: &str, candidates: &[TokenKind]) -> OAuthResult<Principal> {
        let principal = self.jwt.decode(token)?;
        if candidates.contains(&principal.token_type) {
            Ok(principal)
        } else {
            Err(OAuthError::invalid_token("token kind not acceptable"))
        }
    }

    async fn try_opaque(
        &self,
        token: &str,
        candidates: &[TokenKind],
        resolver: Option<&dyn ReferenceResolver>,
    ) -> OAuthResult<Principal> {
        for &kind in candidates {
            let inline_vector = PurposeVector::new("server", kind, Locality::Inline);
            if let Ok(principal) = self.opaque.decode_token(token, &inline_vector) {
                return Ok(principal);
            }

            if let Some(resolver) = resolver {
                let reference_vector = PurposeVector::new("server", kind, Locality::Reference);
                if let Ok(reference_id) = self.opaque.decode_reference(token, &reference_vector) {
                    let payload = resolver.resolve_payload(kind, &reference_id).await?;
                    let principal = self.opaque.decode_payload(&payload, &inline_vector)?;
                    return Ok(principal);
                }
            }
        }
        Err(OAuthError::invalid_token("unable to decrypt token under any acceptable kind"))
    }
}

/// Build the ordered candidate-kind list: the hint first when it is
/// one of the acceptable kinds, then the rest in priority order.
fn candidate_kinds(acceptable: &[TokenKind], hint: Option<TokenKind>) -> Vec<TokenKind> {
    let mut ordered: Vec<TokenKind> = if acceptable.len() == 1 {
        vec![acceptable[0]]
    } else {
        let base: Vec<TokenKind> = if acceptable.is_empty() {
            TokenKind::priority_order().to_vec()
        } else {
            TokenKind::priority_order()
                .iter()
                .copied()
                .filter(|k| acceptable.contains(k))
                .collect()
        };
        base
    };

    if let Some(hint) = hint {
        if let Some(pos) = ordered.iter().position(|k| *k == hint) {
            ordered.remove(pos);
        }
        if acceptable.is_empty() || acceptable.contains(&hint) {
            ordered.insert(0, hint);
        }
    }
    ordered
}

pub(crate) fn shared_master_key_ring() -> Arc<keyring::KeyRing<keyring::MasterKey>> {
    static RING: once_cell::sync::OnceCell<Arc<keyring::KeyRing<keyring::MasterKey>>> = once_cell::sync::OnceCell::new();
    RING.get_or_init(|| {
        Arc::new(keyring::KeyRing::new(keyring::MasterKey {
            key_id: "default".to_string(),
            secret: rand::random(),
        }))
    })
    .clone()
}
