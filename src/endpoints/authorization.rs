//! Authorization endpoint
//!
//! Validates the request, then yields to the host in "pass-through
//! mode" by emitting `RequestSkipped` so a host-side sign-in/consent
//! surface can take over; the core never renders UI.

use std::sync::Arc;

use async_trait::async_trait;

use super::{split_scopes, RuntimeContext};
use crate::error::{OAuthError, OAuthResult};
use crate::store::ApplicationRecord;
use crate::transaction::dispatcher::{order, Handler, HandlerDescriptor};
use crate::transaction::events::EndpointPipeline;
use crate::transaction::{EndpointKind, Transaction};

struct ResolvedClient(ApplicationRecord);

const RESPONSE_TYPES: &[&str] = &["code"];

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

        if !client.permits_endpoint(EndpointKind::Authorization) {
            return Err(OAuthError::unauthorized_client("This client is not permitted to use the authorization endpoint."));
        }

        let redirect_uri = transaction
            .request
            .redirect_uri()
            .ok_or_else(|| OAuthError::invalid_request("redirect_uri"))?;
        if !client.redirect_uris.iter().any(|uri| uri == redirect_uri) {
            return Err(OAuthError::invalid_request("redirect_uri"));
        }

        let response_type = transaction
            .request
            .0
            .get_str("response_type")
            .ok_or_else(|| OAuthError::invalid_request("response_type"))?;
        if !RESPONSE_TYPES.contains(&response_type) {
            return Err(OAuthError::new(crate::error::ErrorCode::UnsupportedGrantType)
                .with_description(format!("The response type '{response_type}' is not supported.")));
        }

        let scopes = transaction.request.scope().map(split_scopes).unwrap_or_default();
        for scope in &scopes {
            if !client.permitted_scopes.is_empty() && !client.permits_scope(scope) {
                return Err(OAuthError::invalid_scope(format!("The scope '{scope}' is not permitted for this client.")));
            }
        }

        let require_pkce = transaction.options.require_pkce || client.requirements.require_pkce;
        if require_pkce && transaction.request.code_challenge().is_none() {
            return Err(OAuthError::invalid_request("code_challenge"));
        }
        if let Some(method) = transaction.request.code_challenge_method() {
            if method != "S256" && method != "plain" {
                return Err(OAuthError::invalid_request("code_challenge_method"));
            }
        }

        transaction.properties_mut().insert(ResolvedClient(client));
        Ok(())
    }
}

struct HandleHandler;

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        // Authentication, consent, and authorization-code issuance are
        // host responsibilities once the request is known well-formed
        //; the core only validates.
        transaction.skip_request();
    }
}

/// The authorization endpoint's complete pipeline.
/// Unlike token/introspection/revocation, the Apply event has nothing
/// to do on the success path: the host owns rendering the sign-in
/// surface once it sees `RequestSkipped`.
pub struct AuthorizationEndpoint {
    pipeline: EndpointPipeline,
}

impl AuthorizationEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("authorization.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline.validate.register(HandlerDescriptor::built_in(
            "authorization.validate",
            order::DEFAULT,
            Arc::new(ValidateHandler { ctx }),
        ));
        pipeline.handle.register(HandlerDescriptor::built_in("authorization.handle", order::DEFAULT, Arc::new(HandleHandler)));
        Self { pipeline }
    }

    #[must_use]
    pub fn endpoint_kind() -> EndpointKind {
        EndpointKind::Authorization
    }

    pub async fn run(&self, transaction: &mut Transaction) {
        self.pipeline.run(transaction).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthOptions;
    use crate::protection::jwt::JwtFormat;
    use crate::protection::keyring::{KeyRing, MasterKey, SigningKey};
    use crate::protection::opaque::OpaqueFormat;
    use crate::protection::Protector;
    use crate::store::memory::{MemoryApplicationStore, MemoryAuthorizationStore, MemoryScopeStore, MemoryTokenStore};
    use crate::store::{ApplicationRequirements, ClientType};
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

    fn test_ctx() -> (RuntimeContext, Arc<MemoryApplicationStore>) {
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
        let ctx = RuntimeContext {
            options: Arc::new(OAuthOptions::default()),
            protector,
            applications: applications.clone(),
            authorizations: Arc::new(MemoryAuthorizationStore::default()),
            tokens: Arc::new(MemoryTokenStore::default()),
            scopes: Arc::new(MemoryScopeStore::default()),
            cache: None,
            reference_resolver: None,
        };
        (ctx, applications)
    }

    #[tokio::test]
    async fn well_formed_request_is_skipped_for_host_handling() {
        let (ctx, applications) = test_ctx();
        applications
            .create(ApplicationRecord {
                id: "app-1".into(),
                client_id: "client-1".into(),
                client_type: ClientType::Public,
                client_secret_hash: None,
                redirect_uris: vec!["https://client.example/callback".into()],
                post_logout_redirect_uris: vec![],
                permitted_endpoints: vec![EndpointKind::Authorization],
                permitted_grant_types: vec!["authorization_code".into()],
                permitted_scopes: vec![],
                requirements: ApplicationRequirements { require_pkce: true },
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let endpoint = AuthorizationEndpoint::new(ctx.clone());
        let mut transaction = Transaction::with_method(
            ctx.options.issuer.clone(),
            EndpointKind::Authorization,
            "GET",
            crate::params::Request(crate::params::Message::read_form(
                "response_type=code&client_id=client-1&redirect_uri=https%3A%2F%2Fclient.example%2Fcallback&code_challenge=abc&code_challenge_method=S256",
            )),
            ctx.options.clone(),
        );
        endpoint.run(&mut transaction).await;
        assert!(matches!(transaction.outcome, crate::transaction::Outcome::RequestSkipped));
    }

    #[tokio::test]
    async fn missing_redirect_uri_is_rejected() {
        let (ctx, applications) = test_ctx();
        applications
            .create(ApplicationRecord {
                id: "app-1".into(),
                client_id: "client-1".into(),
                client_type: ClientType::Public,
                client_secret_hash: None,
                redirect_uris: vec!["https://client.example/callback".into()],
                post_logout_redirect_uris: vec![],
                permitted_endpoints: vec![EndpointKind::Authorization],
                permitted_grant_types: vec!["authorization_code".into()],
                permitted_scopes: vec![],
                requirements: ApplicationRequirements { require_pkce: false },
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let endpoint = AuthorizationEndpoint::new(ctx.clone());
        let mut transaction = Transaction::with_method(
            ctx.options.issuer.clone(),
            EndpointKind::Authorization,
            "GET",
            crate::params::Request(crate::params::Message::read_form("response_type=code&client_id=client-1")),
            ctx.options.clone(),
        );
        endpoint.run(&mut transaction).await;
        assert!(matches!(transaction.outcome, crate::transaction::Outcome::Rejected(_)));
    }
}
