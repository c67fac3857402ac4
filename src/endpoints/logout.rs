//! Logout endpoint
//!
//! Validates `post_logout_redirect_uri` against the client's registered
//! list, then yields to the host in pass-through mode; session teardown
//! and the actual redirect are host responsibilities.

use std::sync::Arc;

use async_trait::async_trait;

use super::RuntimeContext;
use crate::error::{OAuthError, OAuthResult};
use crate::store::ApplicationRecord;
use crate::transaction::dispatcher::{order, Handler, HandlerDescriptor};
use crate::transaction::events::EndpointPipeline;
use crate::transaction::Transaction;

struct ResolvedClient(ApplicationRecord);

struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if !matches!(transaction.http_method.as_str(), "GET" | "POST") {
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
        // A bare id_token_hint with no client context is a valid logout
        // request; only check the redirect when one of
        // client_id/post_logout_redirect_uri is actually present.
        let post_logout_redirect_uri = transaction.request.post_logout_redirect_uri();
        let client_id = transaction.request.client_id();

        if let (Some(client_id), Some(redirect_uri)) = (client_id, post_logout_redirect_uri) {
            let client = self
                .ctx
                .applications
                .find_by_client_id(client_id)
                .await?
                .ok_or_else(|| OAuthError::invalid_client("The specified client could not be found."))?;
            if !client.post_logout_redirect_uris.iter().any(|uri| uri == redirect_uri) {
                return Err(OAuthError::invalid_request("post_logout_redirect_uri"));
            }
            transaction.properties_mut().insert(ResolvedClient(client));
        } else if post_logout_redirect_uri.is_some() {
            return Err(OAuthError::invalid_request("client_id"));
        }

        Ok(())
    }
}

struct HandleHandler;

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        // Session teardown and the post-logout redirect are host
        // responsibilities once the redirect target is known safe.
        transaction.skip_request();
    }
}

/// The logout endpoint's complete pipeline. Like
/// [`authorization`](super::authorization), this carries no Apply
/// stage: the host owns the entire success path.
pub struct LogoutEndpoint {
    pipeline: EndpointPipeline,
}

impl LogoutEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("logout.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline.validate.register(HandlerDescriptor::built_in("logout.validate", order::DEFAULT, Arc::new(ValidateHandler { ctx })));
        pipeline.handle.register(HandlerDescriptor::built_in("logout.handle", order::DEFAULT, Arc::new(HandleHandler)));
        Self { pipeline }
    }

    pub async fn run(&self, transaction: &mut Transaction) {
        self.pipeline.run(transaction).await;
    }
}
