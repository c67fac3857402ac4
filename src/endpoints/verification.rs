//! Verification endpoint
//!
//! The user-facing half of the device flow: resolves a `user_code`
//! typed in on a second device, then approves or denies the pending
//! device-code record the [`device`](super::device) endpoint created.
//! Like [`authorization`](super::authorization), this is a pass-through
//! endpoint: the host renders the actual confirmation UI and performs
//! any redirect once the core reports `RequestSkipped`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::RuntimeContext;
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::store::{AuthorizationRecord, AuthorizationStatus, TokenRecord, TokenStatus};
use crate::transaction::dispatcher::{order, Handler, HandlerDescriptor};
use crate::transaction::events::EndpointPipeline;
use crate::transaction::Transaction;

struct ResolvedDeviceRecord(TokenRecord);

struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if !matches!(transaction.http_method.as_str(), "GET" | "POST") {
            transaction.reject(OAuthError::invalid_request("method"));
            return;
        }
        if transaction.request.user_code().is_none() {
            transaction.reject(OAuthError::invalid_request("user_code"));
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
        let user_code = transaction.request.user_code().unwrap().to_string();
        let record = self
            .ctx
            .tokens
            .find_by_reference_id(&user_code)
            .await?
            .ok_or_else(|| OAuthError::invalid_request("user_code"))?;

        if record.status != TokenStatus::Inactive {
            return Err(OAuthError::invalid_grant("This code has already been resolved."));
        }
        if record.expires_at.is_some_and(|expiry| expiry <= Utc::now()) {
            return Err(OAuthError::expired_token("The device code has expired."));
        }

        transaction.properties_mut().insert(ResolvedDeviceRecord(record));
        Ok(())
    }
}

struct HandleHandler {
    ctx: RuntimeContext,
}

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if let Err(error) = self.resolve(transaction).await {
            transaction.reject(error);
        }
    }
}

impl HandleHandler {
    async fn resolve(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let record = match transaction.properties().get::<ResolvedDeviceRecord>() {
            Some(r) => r.0.clone(),
            // GET with no decision yet: the host is still collecting
            // sign-in/consent, nothing to finalize.
            None => {
                transaction.skip_request();
                return Ok(());
            }
        };

        let decision = transaction.request.0.get_str("decision");
        match decision {
            None => {
                transaction.skip_request();
                Ok(())
            }
            Some("deny") => {
                self.ctx.tokens.try_revoke(&record.id, &record.concurrency_token).await?;
                Err(OAuthError::new(ErrorCode::AccessDenied).with_description("The user denied the request."))
            }
            Some("approve") => {
                let subject = transaction
                    .request
                    .0
                    .get_str("subject")
                    .ok_or_else(|| OAuthError::invalid_request("subject"))?
                    .to_string();

                let authorization = self
                    .ctx
                    .authorizations
                    .create(AuthorizationRecord {
                        id: uuid::Uuid::new_v4().to_string(),
                        status: AuthorizationStatus::Valid,
                        subject: Some(subject.clone()),
                        application_id: record.application_id.clone(),
                        kind: "device".to_string(),
                        scopes: Vec::new(),
                        concurrency_token: String::new(),
                    })
                    .await?;

                let mut approved = record.clone();
                approved.status = TokenStatus::Valid;
                approved.subject = Some(subject);
                approved.authorization_id = Some(authorization.id);
                self.ctx.tokens.update(approved).await?;

                transaction.skip_request();
                Ok(())
            }
            Some(other) => Err(OAuthError::invalid_request("decision").with_description(format!("Unknown decision '{other}'."))),
        }
    }
}

/// The verification endpoint's complete pipeline.
/// Carries no Apply stage: the host renders both the confirmation UI
/// and any error surface once the core reports its outcome.
pub struct VerificationEndpoint {
    pipeline: EndpointPipeline,
}

impl VerificationEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("verification.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline.validate.register(HandlerDescriptor::built_in(
            "verification.validate",
            order::DEFAULT,
            Arc::new(ValidateHandler { ctx: ctx.clone() }),
        ));
        pipeline
            .handle
            .register(HandlerDescriptor::built_in("verification.handle", order::DEFAULT, Arc::new(HandleHandler { ctx })));
        Self { pipeline }
    }

    pub async fn run(&self, transaction: &mut Transaction) {
        self.pipeline.run(transaction).await;
    }
}
