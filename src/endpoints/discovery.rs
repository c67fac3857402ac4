//! Discovery endpoints
//!
//! Unlike the other endpoints, these two take no request parameters to
//! validate: they are plain metadata documents derived from the option
//! snapshot and the signing key material, so there is no Extract/
//! Validate/Apply stage to run.

use std::sync::Arc;

use serde_json::json;

use crate::config::OAuthOptions;
use crate::host::HostResponse;

/// Serves `/.well-known/openid-configuration` and `/.well-known/jwks.json`.
/// The JWKS document is supplied by the embedder at construction time:
/// deriving public-key components back out of a `jsonwebtoken::EncodingKey`
/// isn't possible, so whoever builds the signing key ring also builds its
/// public JWKS representation once, up front.
pub struct DiscoveryEndpoint {
    options: Arc<OAuthOptions>,
    jwks: serde_json::Value,
}

impl DiscoveryEndpoint {
    #[must_use]
    pub fn new(options: Arc<OAuthOptions>, jwks: serde_json::Value) -> Self {
        Self { options, jwks }
    }

    /// The `/.well-known/openid-configuration` document.
    #[must_use]
    pub fn configuration_document(&self) -> HostResponse {
        let issuer = &self.options.issuer;
        let body = json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}{}", self.options.paths.authorization),
            "token_endpoint": format!("{issuer}{}", self.options.paths.token),
            "introspection_endpoint": format!("{issuer}{}", self.options.paths.introspection),
            "revocation_endpoint": format!("{issuer}{}", self.options.paths.revocation),
            "device_authorization_endpoint": format!("{issuer}{}", self.options.paths.device),
            "userinfo_endpoint": format!("{issuer}{}", self.options.paths.userinfo),
            "end_session_endpoint": format!("{issuer}{}", self.options.paths.logout),
            "jwks_uri": format!("{issuer}{}", self.options.paths.jwks),
            "scopes_supported": self.options.registered_scopes,
            "response_types_supported": ["code"],
            "grant_types_supported": self.options.enabled_grant_types,
            "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256", "ES256", "HS256"],
            "code_challenge_methods_supported": ["S256", "plain"],
        });
        HostResponse {
            status: 200,
            headers: vec![("Cache-Control".to_string(), "max-age=3600".to_string())],
            body: Some(body),
        }
    }

    /// The `/.well-known/jwks.json` document.
    #[must_use]
    pub fn jwks_document(&self) -> HostResponse {
        HostResponse {
            status: 200,
            headers: vec![("Cache-Control".to_string(), "max-age=3600".to_string())],
            body: Some(self.jwks.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_document_reflects_option_snapshot() {
        let options = Arc::new(OAuthOptions::default());
        let endpoint = DiscoveryEndpoint::new(options.clone(), json!({"keys": []}));
        let response = endpoint.configuration_document();
        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body.get("issuer").unwrap(), &options.issuer);
        assert_eq!(
            body.get("token_endpoint").unwrap(),
            &format!("{}{}", options.issuer, options.paths.token)
        );
    }

    #[test]
    fn jwks_document_passes_through_supplied_keys() {
        let options = Arc::new(OAuthOptions::default());
        let keys = json!({"keys": [{"kty": "oct", "kid": "k1"}]});
        let endpoint = DiscoveryEndpoint::new(options, keys.clone());
        assert_eq!(endpoint.jwks_document().body.unwrap(), keys);
    }
}
