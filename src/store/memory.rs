//! In-memory store implementations used by tests and examples.
//!
//! Not a production persistence backend; this exists only so the core's state
//! machines can be exercised end-to-end in `#[cfg(test)]`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ApplicationRecord, ApplicationStore, AuthorizationRecord, AuthorizationStatus, AuthorizationStore,
    ConcurrencyToken, ScopeStore, TokenRecord, TokenStatus, TokenStore,
};
use crate::error::OAuthResult;
use crate::protection::{ReferenceResolver, TokenKind};

fn next_token(counter: &AtomicU64) -> ConcurrencyToken {
    counter.fetch_add(1, Ordering::SeqCst).to_string()
}

#[derive(Default)]
pub struct MemoryApplicationStore {
    by_id: RwLock<HashMap<String, ApplicationRecord>>,
    version: AtomicU64,
}

#[async_trait]
impl ApplicationStore for MemoryApplicationStore {
    async fn find_by_id(&self, id: &str) -> OAuthResult<Option<ApplicationRecord>> {
        Ok(self.by_id.read().await.get(id).cloned())
    }

    async fn find_by_client_id(&self, client_id: &str) -> OAuthResult<Option<ApplicationRecord>> {
        Ok(self.by_id.read().await.values().find(|a| a.client_id == client_id).cloned())
    }

    async fn create(&self, mut record: ApplicationRecord) -> OAuthResult<ApplicationRecord> {
        record.concurrency_token = next_token(&self.version);
        self.by_id.write().await.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: ApplicationRecord) -> OAuthResult<bool> {
        let mut guard = self.by_id.write().await;
        match guard.get(&record.id) {
            Some(existing) if existing.concurrency_token == record.concurrency_token => {
                let mut updated = record;
                updated.concurrency_token = next_token(&self.version);
                guard.insert(updated.id.clone(), updated);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryAuthorizationStore {
    by_id: RwLock<HashMap<String, AuthorizationRecord>>,
    version: AtomicU64,
}

#[async_trait]
impl AuthorizationStore for MemoryAuthorizationStore {
    async fn find_by_id(&self, id: &str) -> OAuthResult<Option<AuthorizationRecord>> {
        Ok(self.by_id.read().await.get(id).cloned())
    }

    async fn create(&self, mut record: AuthorizationRecord) -> OAuthResult<AuthorizationRecord> {
        record.concurrency_token = next_token(&self.version);
        self.by_id.write().await.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: AuthorizationRecord) -> OAuthResult<bool> {
        let mut guard = self.by_id.write().await;
        match guard.get(&record.id) {
            Some(existing) if existing.concurrency_token == record.concurrency_token => {
                let mut updated = record;
                updated.concurrency_token = next_token(&self.version);
                guard.insert(updated.id.clone(), updated);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_revoke(&self, id: &str, expected: &ConcurrencyToken) -> OAuthResult<bool> {
        let mut guard = self.by_id.write().await;
        match guard.get_mut(id) {
            Some(record) if &record.concurrency_token == expected => {
                record.status = AuthorizationStatus::Revoked;
                record.concurrency_token = next_token(&self.version);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    by_id: RwLock<HashMap<String, TokenRecord>>,
    version: AtomicU64,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn find_by_id(&self, id: &str) -> OAuthResult<Option<TokenRecord>> {
        Ok(self.by_id.read().await.get(id).cloned())
    }

    async fn find_by_reference_id(&self, reference_id: &str) -> OAuthResult<Option<TokenRecord>> {
        Ok(self
            .by_id
            .read()
            .await
            .values()
            .find(|t| t.reference_id.as_deref() == Some(reference_id))
            .cloned())
    }

    async fn create(&self, mut record: TokenRecord) -> OAuthResult<TokenRecord> {
        record.concurrency_token = next_token(&self.version);
        self.by_id.write().await.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: TokenRecord) -> OAuthResult<bool> {
        let mut guard = self.by_id.write().await;
        match guard.get(&record.id) {
            Some(existing) if existing.concurrency_token == record.concurrency_token => {
                let mut updated = record;
                updated.concurrency_token = next_token(&self.version);
                guard.insert(updated.id.clone(), updated);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_redeem(&self, id: &str, expected: &ConcurrencyToken) -> OAuthResult<bool> {
        let mut guard = self.by_id.write().await;
        match guard.get_mut(id) {
            Some(record) if &record.concurrency_token == expected => {
                record.status = TokenStatus::Redeemed;
                record.redeemed_at = Some(chrono::Utc::now());
                record.concurrency_token = next_token(&self.version);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_revoke(&self, id: &str, expected: &ConcurrencyToken) -> OAuthResult<bool> {
        let mut guard = self.by_id.write().await;
        match guard.get_mut(id) {
            Some(record) if &record.concurrency_token == expected => {
                record.status = TokenStatus::Revoked;
                record.concurrency_token = next_token(&self.version);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn iterate_by_authorization_id(&self, authorization_id: &str) -> OAuthResult<Vec<TokenRecord>> {
        Ok(self
            .by_id
            .read()
            .await
            .values()
            .filter(|t| t.authorization_id.as_deref() == Some(authorization_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryScopeStore {
    registered: RwLock<Vec<String>>,
}

impl MemoryScopeStore {
    pub async fn register(&self, scope: impl Into<String>) {
        self.registered.write().await.push(scope.into());
    }
}

#[async_trait]
impl ScopeStore for MemoryScopeStore {
    async fn is_registered(&self, scope: &str) -> OAuthResult<bool> {
        Ok(self.registered.read().await.iter().any(|s| s == scope))
    }
}

/// A [`ReferenceResolver`] backed by a [`MemoryTokenStore`]'s payload
/// column, used by tests that exercise reference-token indirection.
pub struct MemoryReferenceResolver<'a> {
    pub store: &'a MemoryTokenStore,
    pub reference_kinds: Vec<TokenKind>,
}

#[async_trait]
impl ReferenceResolver for MemoryReferenceResolver<'_> {
    async fn resolve_payload(&self, _kind: TokenKind, reference_id: &str) -> OAuthResult<Vec<u8>> {
        let record = self
            .store
            .find_by_reference_id(reference_id)
            .await?
            .ok_or_else(|| crate::error::OAuthError::invalid_token("unknown reference token"))?;
        Ok(record.payload)
    }

    fn is_reference_kind(&self, kind: TokenKind) -> bool {
        self.reference_kinds.contains(&kind)
    }

    async fn store_payload(&self, kind: TokenKind, payload: Vec<u8>) -> OAuthResult<String> {
        let reference_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create(TokenRecord {
                id: uuid::Uuid::new_v4().to_string(),
                reference_id: Some(reference_id.clone()),
                kind,
                status: TokenStatus::Valid,
                subject: None,
                application_id: None,
                authorization_id: None,
                created_at: chrono::Utc::now(),
                expires_at: None,
                redeemed_at: None,
                payload,
                concurrency_token: String::new(),
            })
            .await?;
        Ok(reference_id)
    }
}
