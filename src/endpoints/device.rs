//! Device authorization endpoint
//!
//! RFC 8628 "device authorization request": a client with no browser
//! of its own exchanges its `client_id` for a `device_code`/`user_code`
//! pair and polls the token endpoint with the `device_code` grant
//! while the user completes verification on a second device.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use super::{split_scopes, RuntimeContext};
use crate::config::OAuthOptions;
use crate::error::{OAuthError, OAuthResult};
use crate::host::{ApplyResponse, ExtractRequest, HostRequest, HostResponse};
use crate::protection::{Principal, TokenKind};
use crate::store::{ApplicationRecord, TokenRecord, TokenStatus};
use crate::transaction::dispatcher::{order, Handler, HandlerDescriptor};
use crate::transaction::events::EndpointPipeline;
use crate::transaction::{EndpointKind, Outcome, Transaction};

struct ResolvedClient(ApplicationRecord);
struct GrantedScopes(Vec<String>);

/// A short, easily-typed code: 8 uppercase letters/digits grouped as
/// `XXXX-XXXX`, excluding visually ambiguous characters.
fn generate_user_code() -> String {
    const ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ0123456789";
    let mut rng = rand::thread_rng();
    let body: String = (0..8).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
    format!("{}-{}", &body[..4], &body[4..])
}

struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if transaction.http_method != "POST" {
            transaction.reject(OAuthError::invalid_request("method"));
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
        let client_id = transaction
            .request
            .client_id()
            .ok_or_else(|| OAuthError::invalid_request("client_id"))?;
        let client = self
            .ctx
            .applications
            .find_by_client_id(client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_client("The specified client could not be found."))?;

        if !client.permits_endpoint(EndpointKind::Device) {
            return Err(OAuthError::unauthorized_client("This client is not permitted to use the device endpoint."));
        }
        if !client.permits_grant_type("urn:ietf:params:oauth:grant-type:device_code") {
            return Err(OAuthError::unauthorized_client("This client is not permitted to use the device_code grant type."));
        }

        let scopes = transaction.request.scope().map(split_scopes).unwrap_or_default();
        for scope in &scopes {
            if !client.permitted_scopes.is_empty() && !client.permits_scope(scope) {
                return Err(OAuthError::invalid_scope(format!("The scope '{scope}' is not permitted for this client.")));
            }
        }

        transaction.properties_mut().insert(ResolvedClient(client));
        transaction.properties_mut().insert(GrantedScopes(scopes));
        Ok(())
    }
}

struct HandleHandler {
    ctx: RuntimeContext,
}

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if let Err(error) = self.issue(transaction).await {
            transaction.reject(error);
            return;
        }
        transaction.handle_request();
    }
}

impl HandleHandler {
    async fn issue(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let options = transaction.options.clone();
        let client = transaction.properties().get::<ResolvedClient>().map(|c| c.0.clone());
        let scopes = transaction.properties().get::<GrantedScopes>().map(|g| g.0.clone()).unwrap_or_default();
        let presenters = client.as_ref().map(|c| vec![c.client_id.clone()]).unwrap_or_default();

        let expiry = chrono::Utc::now() + chrono::Duration::from_std(options.device_code_lifetime).unwrap_or_default();
        let user_code = generate_user_code();

        let device_principal = Principal::builder(TokenKind::DeviceCode)
            .presenters(presenters.clone())
            .scopes(scopes.clone())
            .expires_at(expiry)
            .claim("user_code", vec![user_code.clone()])
            .build();
        let device_code = self.ctx.protector.protect(&device_principal, options.format_for(TokenKind::DeviceCode))?;

        self.ctx
            .tokens
            .create(TokenRecord {
                id: device_principal.token_id.clone(),
                // The user code doubles as the reference id so the
                // verification endpoint can look the pending device
                // record up by what the user actually types in.
                reference_id: Some(user_code.clone()),
                kind: TokenKind::DeviceCode,
                // Inactive until the verification endpoint approves it.
                status: TokenStatus::Inactive,
                subject: None,
                application_id: client.as_ref().map(|c| c.id.clone()),
                authorization_id: None,
                created_at: device_principal.created_at,
                expires_at: Some(expiry),
                redeemed_at: None,
                payload: Vec::new(),
                concurrency_token: String::new(),
            })
            .await?;

        transaction.response.0.set("device_code", device_code);
        transaction.response.0.set("user_code", user_code.clone());
        transaction.response.0.set("verification_uri", format!("{}{}", options.issuer, options.paths.verification));
        transaction.response.0.set(
            "verification_uri_complete",
            format!(
                "{}{}?user_code={}",
                options.issuer,
                options.paths.verification,
                urlencoding::encode(&user_code)
            ),
        );
        transaction.response.set_expires_in(options.device_code_lifetime.as_secs() as i64);
        transaction.response.0.set("interval", 5_i64);
        Ok(())
    }
}

struct ApplyHandler;

#[async_trait]
impl Handler for ApplyHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if let Outcome::Rejected(error) = &transaction.outcome {
            super::token::apply_error(transaction, error.clone());
        }
    }
}

/// The device authorization endpoint's complete pipeline.
pub struct DeviceEndpoint {
    pipeline: EndpointPipeline,
}

impl DeviceEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("device.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline
            .validate
            .register(HandlerDescriptor::built_in("device.validate", order::DEFAULT, Arc::new(ValidateHandler { ctx: ctx.clone() })));
        pipeline
            .handle
            .register(HandlerDescriptor::built_in("device.handle", order::DEFAULT, Arc::new(HandleHandler { ctx })));
        pipeline.apply.register(HandlerDescriptor::built_in("device.apply", order::TERMINAL, Arc::new(ApplyHandler)));
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
            Transaction::with_method(options.issuer.clone(), EndpointKind::Device, host_request.method.clone(), request, options);
        self.pipeline.run(&mut transaction).await;
        let status = match &transaction.outcome {
            Outcome::Rejected(error) => error.code.default_status(),
            _ => 200,
        };
        host.apply_response(&transaction.response, status).await
    }
}
