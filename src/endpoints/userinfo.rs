//! UserInfo endpoint

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

/// Claim names surfaced per standard scope. `sub` is always present and is not listed here.
const PROFILE_CLAIMS: &[&str] = &["name", "given_name", "family_name", "preferred_username", "picture", "updated_at"];
const EMAIL_CLAIMS: &[&str] = &["email", "email_verified"];
const PHONE_CLAIMS: &[&str] = &["phone_number", "phone_number_verified"];
const ADDRESS_CLAIMS: &[&str] = &["address"];

struct ResolvedPrincipal(Principal);

struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if !matches!(transaction.http_method.as_str(), "GET" | "POST") {
            transaction.reject(OAuthError::invalid_request("method"));
        } else if transaction.request.token().is_none() {
            transaction.reject(OAuthError::new(crate::error::ErrorCode::MissingToken).with_description("No access token was presented."));
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
        let principal = self
            .ctx
            .protector
            .validate(&token, &[TokenKind::AccessToken], None, self.ctx.reference_resolver.as_deref())
            .await
            .map_err(|_| OAuthError::invalid_token("the access token could not be resolved"))?;

        if principal.is_expired(chrono::Utc::now()) {
            return Err(OAuthError::expired_token("The access token has expired."));
        }
        if principal.subject.is_none() {
            return Err(OAuthError::new(crate::error::ErrorCode::InsufficientScope)
                .with_description("This token was not issued to an end user."));
        }

        transaction.properties_mut().insert(ResolvedPrincipal(principal));
        Ok(())
    }
}

struct HandleHandler;

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        let principal = transaction.properties().get::<ResolvedPrincipal>().map(|r| r.0.clone());
        let Some(principal) = principal else {
            transaction.reject(OAuthError::fault("userinfo.missing_resolution", "principal resolved without a value"));
            return;
        };

        transaction.response.0.set("sub", principal.subject.clone().unwrap_or_default());

        // Audiences carried by the token are the resource servers it is
        // valid for, not this client; the claims are scoped to the
        // caller via the token's presenters instead.
        match principal.presenters.len() {
            0 => {}
            1 => transaction.response.0.set("aud", principal.presenters[0].clone()),
            _ => transaction.response.0.set("aud", principal.presenters.clone()),
        }
        transaction.response.0.set("iss", transaction.issuer.clone());

        let scopes = &principal.scopes;
        if scopes.iter().any(|s| s == "profile") {
            set_claims(transaction, &principal, PROFILE_CLAIMS);
        }
        if scopes.iter().any(|s| s == "email") {
            set_claims(transaction, &principal, EMAIL_CLAIMS);
        }
        if scopes.iter().any(|s| s == "phone") {
            set_claims(transaction, &principal, PHONE_CLAIMS);
        }
        if scopes.iter().any(|s| s == "address") {
            set_claims(transaction, &principal, ADDRESS_CLAIMS);
        }

        transaction.handle_request();
    }
}

/// Copy each named claim present on the principal into the response,
/// omitting any the principal does not carry.
fn set_claims(transaction: &mut Transaction, principal: &Principal, names: &[&str]) {
    for &name in names {
        if let Some(values) = principal.claim(name) {
            match values {
                [] => {}
                [single] => transaction.response.0.set(name, single.clone()),
                many => transaction.response.0.set(name, many.to_vec()),
            }
        }
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

/// The userinfo endpoint's complete pipeline.
pub struct UserinfoEndpoint {
    pipeline: EndpointPipeline,
}

impl UserinfoEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("userinfo.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline.validate.register(HandlerDescriptor::built_in("userinfo.validate", order::DEFAULT, Arc::new(ValidateHandler { ctx })));
        pipeline.handle.register(HandlerDescriptor::built_in("userinfo.handle", order::DEFAULT, Arc::new(HandleHandler)));
        pipeline.apply.register(HandlerDescriptor::built_in("userinfo.apply", order::TERMINAL, Arc::new(ApplyHandler)));
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
            Transaction::with_method(options.issuer.clone(), EndpointKind::Userinfo, host_request.method.clone(), request, options);
        self.pipeline.run(&mut transaction).await;
        let status = match &transaction.outcome {
            Outcome::Rejected(error) => error.code.default_status(),
            _ => 200,
        };
        host.apply_response(&transaction.response, status).await
    }
}
