//! Shared scaffolding for end-to-end integration tests: a full
//! `RuntimeContext` backed by the in-memory store doubles, wired the
//! same way the colocated unit tests build one.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

use oxide_oidc::config::OAuthOptions;
use oxide_oidc::endpoints::RuntimeContext;
use oxide_oidc::protection::jwt::JwtFormat;
use oxide_oidc::protection::keyring::{KeyRing, MasterKey, SigningKey};
use oxide_oidc::protection::opaque::OpaqueFormat;
use oxide_oidc::protection::Protector;
use oxide_oidc::store::memory::{MemoryApplicationStore, MemoryAuthorizationStore, MemoryScopeStore, MemoryTokenStore};

pub struct Harness {
    pub ctx: RuntimeContext,
    pub applications: Arc<MemoryApplicationStore>,
    pub authorizations: Arc<MemoryAuthorizationStore>,
    pub tokens: Arc<MemoryTokenStore>,
}

pub fn harness() -> Harness {
    harness_with(OAuthOptions::default())
}

pub fn harness_with(options: OAuthOptions) -> Harness {
    let secret = b"test-signing-secret-at-least-32-bytes!!";
    let signing_ring = Arc::new(KeyRing::new(SigningKey {
        key_id: "k1".into(),
        algorithm: Algorithm::HS256,
        encoding_key: EncodingKey::from_secret(secret),
        decoding_key: DecodingKey::from_secret(secret),
    }));
    let master_ring = Arc::new(KeyRing::new(MasterKey { key_id: "m1".into(), secret: [9u8; 32] }));
    let protector = Arc::new(Protector::new(JwtFormat::new(signing_ring), OpaqueFormat::new(master_ring)));

    let applications = Arc::new(MemoryApplicationStore::default());
    let authorizations = Arc::new(MemoryAuthorizationStore::default());
    let tokens = Arc::new(MemoryTokenStore::default());

    let ctx = RuntimeContext {
        options: Arc::new(options),
        protector,
        applications: applications.clone(),
        authorizations: authorizations.clone(),
        tokens: tokens.clone(),
        scopes: Arc::new(MemoryScopeStore::default()),
        cache: None,
        reference_resolver: None,
    };

    Harness { ctx, applications, authorizations, tokens }
}
