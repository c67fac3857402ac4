//! Revocation endpoint

use std::sync::Arc;

use async_trait::async_trait;

use super::token::apply_error;
use super::RuntimeContext;
use crate::config::OAuthOptions;
use crate::error::{OAuthError, OAuthResult};
use crate::host::{ExtractRequest, ApplyResponse, HostRequest, HostResponse};
use crate::protection::TokenKind;
use crate::store::TokenStatus;
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

struct ValidateHandler {
    ctx: RuntimeContext,
}

#[async_trait]
impl Handler for ValidateHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if let Err(error) = self.validate(transaction).await {
            transaction.reject(error);
        }
    }
}

impl ValidateHandler {
    async fn validate(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let token = transaction.request.token().unwrap().to_string();
        let caller = transaction.request.client_id().map(str::to_string);

        let hinted = match transaction.request.token_type_hint() {
            Some("refresh_token") => Some(vec![TokenKind::RefreshToken, TokenKind::AccessToken]),
            Some("access_token") => Some(vec![TokenKind::AccessToken, TokenKind::RefreshToken]),
            Some(other) => return Err(OAuthError::unsupported_token_type(other)),
            None => None,
        };

        // RFC 7009: a hint is only a hint. If the token can't be found
        // under it, the search extends across every kind this system
        // knows how to validate before giving up.
        let all_kinds = TokenKind::priority_order().to_vec();
        let first_pass = hinted.as_deref().unwrap_or(&all_kinds);

        let principal = match self
            .ctx
            .protector
            .validate(&token, first_pass, None, self.ctx.reference_resolver.as_deref())
            .await
        {
            Ok(principal) => principal,
            Err(_) if hinted.is_some() => match self
                .ctx
                .protector
                .validate(&token, &all_kinds, None, self.ctx.reference_resolver.as_deref())
                .await
            {
                Ok(principal) => principal,
                Err(_) => return Err(OAuthError::invalid_token("the token could not be resolved")),
            },
            Err(_) => return Err(OAuthError::invalid_token("the token could not be resolved")),
        };

        // Revocation only applies to access and refresh tokens; any
        // other resolved kind is reported rather than silently rejected
        // as an unknown token.
        if !matches!(principal.token_type, TokenKind::AccessToken | TokenKind::RefreshToken) {
            return Err(OAuthError::unsupported_token_type(principal.token_type.as_str()));
        }

        if let Some(caller) = &caller {
            let entitled = principal.audiences.iter().any(|a| a == caller) || principal.presenters.iter().any(|p| p == caller);
            if !entitled {
                return Err(OAuthError::invalid_token("the caller is not entitled to revoke this token"));
            }
        }

        let record = self.ctx.tokens.find_by_id(&principal.token_id).await?;
        match record {
            Some(record) if record.status == TokenStatus::Valid => {
                transaction.properties_mut().insert(ResolvedTokenId(record.id));
            }
            Some(_) => return Err(OAuthError::invalid_token("the token is no longer valid")),
            None => return Err(OAuthError::invalid_token("the token could not be found")),
        }

        Ok(())
    }
}

struct ResolvedTokenId(String);

struct HandleHandler {
    ctx: RuntimeContext,
}

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        let Some(ResolvedTokenId(id)) = transaction.properties().get::<ResolvedTokenId>().map(|r| ResolvedTokenId(r.0.clone())) else {
            transaction.reject(OAuthError::fault("revocation.missing_resolution", "token resolved without an id"));
            return;
        };
        match self.ctx.tokens.find_by_id(&id).await {
            Ok(Some(record)) => match self.ctx.tokens.try_revoke(&id, &record.concurrency_token).await {
                Ok(_) => transaction.handle_request(),
                Err(error) => transaction.reject(error),
            },
            Ok(None) => transaction.reject(OAuthError::invalid_token("the token could not be found")),
            Err(error) => transaction.reject(error),
        }
    }
}

struct ApplyHandler {
    options: Arc<OAuthOptions>,
}

#[async_trait]
impl Handler for ApplyHandler {
    // Normalizing unknown/revoked tokens to an empty 200 instead of
    // `invalid_token` is a configuration flag, decided per deployment
    // rather than hardcoded (see DESIGN.md).
    async fn handle(&self, transaction: &mut Transaction) {
        if let Outcome::Rejected(error) = transaction.outcome.clone() {
            if self.options.normalize_revocation_errors && error.code == crate::error::ErrorCode::InvalidToken {
                transaction.outcome = Outcome::RequestHandled;
                return;
            }
            apply_error(transaction, error);
        }
    }
}

/// The revocation endpoint's complete pipeline.
pub struct RevocationEndpoint {
    pipeline: EndpointPipeline,
}

impl RevocationEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("revocation.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline.validate.register(HandlerDescriptor::built_in(
            "revocation.validate",
            order::DEFAULT,
            Arc::new(ValidateHandler { ctx: ctx.clone() }),
        ));
        pipeline
            .handle
            .register(HandlerDescriptor::built_in("revocation.handle", order::DEFAULT, Arc::new(HandleHandler { ctx: ctx.clone() })));
        pipeline.apply.register(HandlerDescriptor::built_in(
            "revocation.apply",
            order::TERMINAL,
            Arc::new(ApplyHandler { options: ctx.options.clone() }),
        ));
        Self { pipeline }
    }

    pub async fn process(
        &self,
        host: &(dyn super::token::ExtractAndApply),
        host_request: HostRequest,
        options: Arc<OAuthOptions>,
    ) -> OAuthResult<HostResponse> {
        let request = host.extract_request(&host_request).await?;
        let mut transaction =
            Transaction::with_method(options.issuer.clone(), EndpointKind::Revocation, host_request.method.clone(), request, options);
        self.pipeline.run(&mut transaction).await;
        let status = match &transaction.outcome {
            Outcome::Rejected(error) => error.code.default_status(),
            _ => 200,
        };
        host.apply_response(&transaction.response, status).await
    }
}
