//! Introspection endpoint

use std::sync::Arc;

use async_trait::async_trait;

use super::token::apply_error;
use super::RuntimeContext;
use crate::config::OAuthOptions;
use crate::error::{OAuthError, OAuthResult};
use crate::host::{ApplyResponse, ExtractRequest, HostRequest, HostResponse};
use crate::protection::{Principal, TokenKind};
use crate::transaction::dispatcher::{order, Handler, HandlerDescriptor};
use crate::transaction::events::EndpointPipeline;
use crate::transaction::{EndpointKind, Outcome, Transaction};

struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if transaction.http_method != "POST" {
            transaction.reject(OAuthError::invalid_request("method"));
        } else if transaction.request.token().is_none() {
            transaction.reject(OAuthError::invalid_request("token"));
        }
    }
}

struct ResolvedPrincipal(Option<Principal>);

struct ValidateHandler {
    ctx: RuntimeContext,
}

#[async_trait]
impl Handler for ValidateHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        let token = transaction.request.token().unwrap().to_string();
        let caller = transaction.request.client_id().map(str::to_string);

        let acceptable = match transaction.request.token_type_hint() {
            Some("refresh_token") => vec![TokenKind::RefreshToken, TokenKind::AccessToken],
            Some("access_token") => vec![TokenKind::AccessToken, TokenKind::RefreshToken],
            Some(other) => {
                transaction.reject(OAuthError::unsupported_token_type(other));
                return;
            }
            None => vec![TokenKind::AccessToken, TokenKind::RefreshToken],
        };

        let principal = self
            .ctx
            .protector
            .validate(&token, &acceptable, None, self.ctx.reference_resolver.as_deref())
            .await
            .ok();

        // Tokens the caller is not entitled to inspect are folded into
        // `active: false` rather than an error.
        let entitled = match (&principal, &caller) {
            (Some(principal), Some(caller)) => principal.audiences.iter().any(|a| a == caller) || principal.presenters.iter().any(|p| p == caller),
            (Some(_), None) => true,
            (None, _) => false,
        };

        let mut resolved = if entitled {
            match &principal {
                Some(p) if !p.is_expired(chrono::Utc::now()) => principal,
                _ => None,
            }
        } else {
            None
        };

        // A revoked or redeemed store record makes an otherwise
        // well-formed, unexpired token inactive too; a missing record
        // is degraded mode and does not affect activity.
        if let Some(p) = &resolved {
            if let Some(record) = self.ctx.tokens.find_by_id(&p.token_id).await.unwrap_or(None) {
                if record.status != crate::store::TokenStatus::Valid {
                    resolved = None;
                }
            }
        }

        transaction.properties_mut().insert(ResolvedPrincipal(resolved));
    }
}

struct HandleHandler;

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        let principal = transaction.properties().get::<ResolvedPrincipal>().and_then(|r| r.0.clone());
        match principal {
            Some(principal) => {
                transaction.response.0.set("active", true);
                if let Some(subject) = &principal.subject {
                    transaction.response.0.set("sub", subject.as_str());
                    transaction.response.0.set("username", subject.as_str());
                }
                if !principal.presenters.is_empty() {
                    transaction.response.0.set("client_id", principal.presenters[0].as_str());
                }
                if !principal.scopes.is_empty() {
                    transaction.response.0.set("scope", principal.scopes.join(" "));
                }
                transaction.response.0.set("iat", principal.created_at.timestamp());
                if let Some(exp) = principal.expires_at {
                    transaction.response.0.set("exp", exp.timestamp());
                }
                transaction.response.0.set("iss", transaction.issuer.clone());
                transaction.response.0.set("token_type", "Bearer");
                transaction.response.0.set("jti", principal.token_id.clone());
                match principal.audiences.len() {
                    0 => {}
                    1 => transaction.response.0.set("aud", principal.audiences[0].clone()),
                    _ => transaction.response.0.set("aud", principal.audiences.clone()),
                }
            }
            None => {
                transaction.response.0.set("active", false);
            }
        }
        transaction.handle_request();
    }
}

struct ApplyHandler;

#[async_trait]
impl Handler for ApplyHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if let Outcome::Rejected(error) = &transaction.outcome {
            apply_error(transaction, error.clone());
        }
    }
}

/// The introspection endpoint's complete pipeline.
pub struct IntrospectionEndpoint {
    pipeline: EndpointPipeline,
}

impl IntrospectionEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("introspection.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline.validate.register(HandlerDescriptor::built_in(
            "introspection.validate",
            order::DEFAULT,
            Arc::new(ValidateHandler { ctx }),
        ));
        pipeline.handle.register(HandlerDescriptor::built_in("introspection.handle", order::DEFAULT, Arc::new(HandleHandler)));
        pipeline.apply.register(HandlerDescriptor::built_in("introspection.apply", order::TERMINAL, Arc::new(ApplyHandler)));
        Self { pipeline }
    }

    pub async fn process(
        &self,
        host: &(dyn super::token::ExtractAndApply),
        host_request: HostRequest,
        options: Arc<OAuthOptions>,
    ) -> OAuthResult<HostResponse> {
        let request = host.extract_request(&host_request).await?;
        let mut transaction = Transaction::with_method(
            options.issuer.clone(),
            EndpointKind::Introspection,
            host_request.method.clone(),
            request,
            options,
        );
        self.pipeline.run(&mut transaction).await;
        let status = match &transaction.outcome {
            Outcome::Rejected(error) => error.code.default_status(),
            _ => 200,
        };
        host.apply_response(&transaction.response, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DefaultHost;
    use crate::protection::jwt::JwtFormat;
    use crate::protection::keyring::{KeyRing, MasterKey, SigningKey};
    use crate::protection::opaque::OpaqueFormat;
    use crate::protection::{Format, Protector};
    use crate::store::memory::{MemoryApplicationStore, MemoryAuthorizationStore, MemoryScopeStore, MemoryTokenStore};
    use crate::store::TokenStore;
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

    fn test_ctx() -> RuntimeContext {
        let secret = b"test-signing-secret-at-least-32-bytes!!";
        let signing_ring = Arc::new(KeyRing::new(SigningKey {
            key_id: "k1".into(),
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }));
        let master_ring = Arc::new(KeyRing::new(MasterKey { key_id: "m1".into(), secret: [9u8; 32] }));
        let protector = Arc::new(Protector::new(JwtFormat::new(signing_ring), OpaqueFormat::new(master_ring)));
        RuntimeContext {
            options: Arc::new(OAuthOptions::default()),
            protector,
            applications: Arc::new(MemoryApplicationStore::default()),
            authorizations: Arc::new(MemoryAuthorizationStore::default()),
            tokens: Arc::new(MemoryTokenStore::default()),
            scopes: Arc::new(MemoryScopeStore::default()),
            cache: None,
            reference_resolver: None,
        }
    }

    #[tokio::test]
    async fn entitled_caller_sees_active_introspection() {
        let ctx = test_ctx();
        let principal = Principal::builder(TokenKind::AccessToken)
            .subject("user-1")
            .presenters(vec!["client-1".into()])
            .scopes(vec!["openid".into()])
            .expires_at(chrono::Utc::now() + chrono::Duration::hours(1))
            .build();
        let token = ctx.protector.protect(&principal, Format::Jwt).unwrap();

        let endpoint = IntrospectionEndpoint::new(ctx.clone());
        let response = endpoint
            .process(
                &DefaultHost,
                HostRequest::post(format!("token={token}&client_id=client-1")),
                ctx.options.clone(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_ref().unwrap().get("active").unwrap(), true);
        assert_eq!(response.body.unwrap().get("sub").unwrap(), "user-1");
    }

    #[tokio::test]
    async fn non_entitled_caller_sees_inactive_without_error() {
        let ctx = test_ctx();
        let principal = Principal::builder(TokenKind::AccessToken)
            .presenters(vec!["client-1".into()])
            .expires_at(chrono::Utc::now() + chrono::Duration::hours(1))
            .build();
        let token = ctx.protector.protect(&principal, Format::Jwt).unwrap();

        let endpoint = IntrospectionEndpoint::new(ctx.clone());
        let response = endpoint
            .process(
                &DefaultHost,
                HostRequest::post(format!("token={token}&client_id=someone-else")),
                ctx.options.clone(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.unwrap().get("active").unwrap(), false);
    }

    #[tokio::test]
    async fn revoked_store_record_overrides_an_unexpired_token() {
        let ctx = test_ctx();
        let principal = Principal::builder(TokenKind::AccessToken)
            .token_id("tok-1")
            .subject("user-1")
            .expires_at(chrono::Utc::now() + chrono::Duration::hours(1))
            .build();
        let token = ctx.protector.protect(&principal, Format::Jwt).unwrap();
        ctx.tokens
            .create(crate::store::TokenRecord {
                id: "tok-1".into(),
                reference_id: None,
                kind: TokenKind::AccessToken,
                status: crate::store::TokenStatus::Revoked,
                subject: Some("user-1".into()),
                application_id: None,
                authorization_id: None,
                created_at: chrono::Utc::now(),
                expires_at: None,
                redeemed_at: None,
                payload: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let endpoint = IntrospectionEndpoint::new(ctx.clone());
        let response = endpoint
            .process(&DefaultHost, HostRequest::post(format!("token={token}")), ctx.options.clone())
            .await
            .unwrap();
        assert_eq!(response.body.unwrap().get("active").unwrap(), false);
    }
}
