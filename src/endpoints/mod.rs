//! Endpoint state machines
//!
//! Each endpoint runs a fixed Extract -> Validate -> Handle -> Apply
//! sequence.

pub mod authorization;
pub mod device;
pub mod discovery;
pub mod introspection;
pub mod logout;
pub mod revocation;
pub mod token;
pub mod userinfo;
pub mod verification;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::OAuthOptions;
use crate::protection::{Protector, ReferenceResolver};
use crate::store::{ApplicationStore, AuthorizationStore, ScopeStore, TokenStore};
use crate::store::cache::ApplicationCache;

/// Everything an endpoint handler needs beyond the transaction itself:
/// options, the protection layer, and the four abstract stores.
#[derive(Clone)]
pub struct RuntimeContext {
    pub options: Arc<OAuthOptions>,
    pub protector: Arc<Protector>,
    pub applications: Arc<dyn ApplicationStore>,
    pub authorizations: Arc<dyn AuthorizationStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub scopes: Arc<dyn ScopeStore>,
    pub cache: Option<Arc<ApplicationCache>>,
    pub reference_resolver: Option<Arc<dyn ReferenceResolver>>,
}

/// Constant-time comparison for client secrets.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verify a PKCE code verifier against a recorded challenge.
#[must_use]
pub fn verify_pkce(method: &str, verifier: &str, challenge: &str) -> bool {
    match method {
        "S256" => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            constant_time_eq(&computed, challenge)
        }
        "plain" => constant_time_eq(verifier, challenge),
        _ => false,
    }
}

/// Split a space-delimited scope string into its constituent scopes.
#[must_use]
pub fn split_scopes(scope: &str) -> Vec<String> {
    scope.split(' ').filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_s256_matches_spec_vector() {
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert!(verify_pkce("S256", verifier, challenge));
        assert!(!verify_pkce("S256", "invalid_verifier", challenge));
    }

    #[test]
    fn pkce_plain_matches_spec_vector() {
        assert!(verify_pkce("plain", "challenge", "challenge"));
        assert!(!verify_pkce("plain", "other", "challenge"));
    }
}
