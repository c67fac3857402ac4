//! Store-backed consistency
//!
//! Abstract stores for applications, authorizations, tokens, and scopes.
//! Implementations are external collaborators; the core depends only on
//! these interfaces.

pub mod cache;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::OAuthResult;
use crate::protection::TokenKind;
use crate::transaction::EndpointKind;

/// A version stamp returned on reads and required on writes so
/// concurrent writers can detect that another writer progressed first.
pub type ConcurrencyToken = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRequirements {
    pub require_pkce: bool,
}

/// A registered OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: String,
    pub client_id: String,
    pub client_type: ClientType,
    /// Constant-time comparable secret hash; `None` for public clients.
    /// Held as a [`SecretString`] so it is zeroized on drop and never
    /// appears in a `Debug` output.
    #[serde(serialize_with = "serialize_secret_opt", deserialize_with = "deserialize_secret_opt", default)]
    pub client_secret_hash: Option<SecretString>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub permitted_endpoints: Vec<EndpointKind>,
    pub permitted_grant_types: Vec<String>,
    pub permitted_scopes: Vec<String>,
    pub requirements: ApplicationRequirements,
    pub concurrency_token: ConcurrencyToken,
}

fn serialize_secret_opt<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    secret.as_ref().map(ExposeSecret::expose_secret).serialize(serializer)
}

fn deserialize_secret_opt<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::new))
}

impl ApplicationRecord {
    #[must_use]
    pub fn permits_endpoint(&self, endpoint: EndpointKind) -> bool {
        self.permitted_endpoints.iter().any(|e| std::mem::discriminant(e) == std::mem::discriminant(&endpoint))
    }

    #[must_use]
    pub fn permits_grant_type(&self, grant_type: &str) -> bool {
        self.permitted_grant_types.iter().any(|g| g == grant_type)
    }

    #[must_use]
    pub fn permits_scope(&self, scope: &str) -> bool {
        self.permitted_scopes.iter().any(|s| s == scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    Inactive,
    Redeemed,
    Revoked,
}

/// A persisted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: String,
    pub reference_id: Option<String>,
    pub kind: TokenKind,
    pub status: TokenStatus,
    pub subject: Option<String>,
    pub application_id: Option<String>,
    pub authorization_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
    pub concurrency_token: ConcurrencyToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Valid,
    Revoked,
}

/// A persisted authorization grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub id: String,
    pub status: AuthorizationStatus,
    pub subject: Option<String>,
    pub application_id: Option<String>,
    pub kind: String,
    pub scopes: Vec<String>,
    pub concurrency_token: ConcurrencyToken,
}

/// Application storage.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> OAuthResult<Option<ApplicationRecord>>;
    async fn find_by_client_id(&self, client_id: &str) -> OAuthResult<Option<ApplicationRecord>>;
    async fn create(&self, record: ApplicationRecord) -> OAuthResult<ApplicationRecord>;
    async fn update(&self, record: ApplicationRecord) -> OAuthResult<bool>;
}

/// Authorization storage.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> OAuthResult<Option<AuthorizationRecord>>;
    async fn create(&self, record: AuthorizationRecord) -> OAuthResult<AuthorizationRecord>;
    async fn update(&self, record: AuthorizationRecord) -> OAuthResult<bool>;
    /// Attempt to revoke, returning `false` if another writer's
    /// concurrency token won the race.
    async fn try_revoke(&self, id: &str, expected: &ConcurrencyToken) -> OAuthResult<bool>;
}

/// Token storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> OAuthResult<Option<TokenRecord>>;
    async fn find_by_reference_id(&self, reference_id: &str) -> OAuthResult<Option<TokenRecord>>;
    async fn create(&self, record: TokenRecord) -> OAuthResult<TokenRecord>;
    async fn update(&self, record: TokenRecord) -> OAuthResult<bool>;
    async fn try_redeem(&self, id: &str, expected: &ConcurrencyToken) -> OAuthResult<bool>;
    async fn try_revoke(&self, id: &str, expected: &ConcurrencyToken) -> OAuthResult<bool>;
    /// Every token sharing `authorization_id`, for cascade revocation.
    async fn iterate_by_authorization_id(&self, authorization_id: &str) -> OAuthResult<Vec<TokenRecord>>;
}

/// Scope storage; registered scopes not already covered
/// by static options.
#[async_trait]
pub trait ScopeStore: Send + Sync {
    async fn is_registered(&self, scope: &str) -> OAuthResult<bool>;
}
