//! Token endpoint
//!
//! `extracted -> validated -> handled -> applied | rejected`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use secrecy::ExposeSecret;

use super::{constant_time_eq, split_scopes, verify_pkce, RuntimeContext};
use crate::config::OAuthOptions;
use crate::error::{OAuthError, OAuthResult};
use crate::host::{ApplyResponse, ExtractRequest, HostRequest, HostResponse};
use crate::params::Request;
use crate::protection::{Format, Principal, PrincipalBuilder, TokenKind};
use crate::store::{ApplicationRecord, ClientType, TokenRecord, TokenStatus};
use crate::transaction::dispatcher::{order, Dispatcher, Handler, HandlerDescriptor};
use crate::transaction::events::EndpointPipeline;
use crate::transaction::{EndpointKind, Outcome, Transaction};

/// Property-bag entry: the resolved client application, once identified
/// in Validate step 7.
struct ResolvedClient(ApplicationRecord);

/// Property-bag entry: the principal decoded from the presented
/// authorization code / refresh token (Validate step 10).
struct PresentedPrincipal(Principal);

/// Property-bag entry: the store record backing the presented token,
/// when the grant is store-backed (Validate step 12).
struct PresentedTokenRecord(TokenRecord);

/// Property-bag entry: scopes resolved and permitted for this request.
struct GrantedScopes(Vec<String>);

struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if transaction.http_method != "POST" {
            transaction.reject(
                OAuthError::invalid_request("method").with_description("The token endpoint only supports the POST method."),
            );
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
        let options = transaction.options.clone();

        // Step 1-2: grant_type present and supported.
        let grant_type = transaction
            .request
            .grant_type()
            .ok_or_else(|| OAuthError::invalid_request("grant_type"))?
            .to_string();
        if !options.grant_type_enabled(&grant_type) {
            return Err(OAuthError::unsupported_grant_type(&grant_type));
        }

        // Step 3-6: grant-specific required parameters.
        match grant_type.as_str() {
            "authorization_code" => self.validate_authorization_code_params(transaction)?,
            "refresh_token" => self.validate_refresh_token_params(transaction)?,
            "urn:ietf:params:oauth:grant-type:device_code" => {
                if transaction.request.device_code().is_none() {
                    return Err(OAuthError::invalid_request("device_code"));
                }
            }
            "client_credentials" => {
                if transaction.request.client_id().is_none() || transaction.request.client_secret().is_none() {
                    return Err(OAuthError::invalid_request("client_id"));
                }
            }
            "password" => {
                if transaction.request.username().is_none() || transaction.request.password().is_none() {
                    return Err(OAuthError::invalid_request("username"));
                }
            }
            _ => {}
        }

        // Step 7: client resolution, unless anonymous/password without identification.
        let requires_client = grant_type != "password" || transaction.request.client_id().is_some();
        let client = if requires_client {
            Some(self.resolve_client(transaction).await?)
        } else {
            None
        };

        // Step 8: endpoint / grant-type / scope permission checks.
        if let Some(client) = &client {
            if !client.permits_endpoint(EndpointKind::Token) {
                return Err(OAuthError::unauthorized_client("This client is not permitted to use the token endpoint."));
            }
            if !client.permits_grant_type(&grant_type) {
                return Err(OAuthError::unauthorized_client(format!(
                    "This client is not permitted to use the '{grant_type}' grant type."
                )));
            }
        }

        // Step 9: requested scopes must all be registered.
        let requested_scopes = transaction
            .request
            .scope()
            .map(split_scopes)
            .unwrap_or_default();
        for scope in &requested_scopes {
            let registered = options.registered_scopes.iter().any(|s| s == scope)
                || self.ctx.scopes.is_registered(scope).await?;
            if !registered {
                return Err(OAuthError::invalid_scope(format!("The scope '{scope}' is not registered.")));
            }
            if let Some(client) = &client {
                if !client.permitted_scopes.is_empty() && !client.permits_scope(scope) {
                    return Err(OAuthError::invalid_request(&format!("scope:{scope}")));
                }
            }
        }
        if requested_scopes.contains(&"offline_access".to_string()) && options.offline_access_requires_refresh_grant && !options.grant_type_enabled("refresh_token") {
            return Err(OAuthError::invalid_request("scope"));
        }

        if let Some(client) = client {
            transaction.properties_mut().insert(ResolvedClient(client));
        }
        transaction.properties_mut().insert(GrantedScopes(requested_scopes));

        // Step 10-13: resolve and verify the presented token for
        // code/refresh grants.
        match grant_type.as_str() {
            "authorization_code" => self.validate_authorization_code_token(transaction).await?,
            "refresh_token" => self.validate_refresh_token(transaction).await?,
            "urn:ietf:params:oauth:grant-type:device_code" => self.validate_device_code(transaction).await?,
            _ => {}
        }

        Ok(())
    }

    fn validate_authorization_code_params(&self, transaction: &Transaction) -> OAuthResult<()> {
        if transaction.request.client_id().is_none() {
            return Err(OAuthError::invalid_request("client_id"));
        }
        if transaction.request.code().is_none() {
            return Err(OAuthError::invalid_request("code"));
        }
        Ok(())
    }

    fn validate_refresh_token_params(&self, transaction: &Transaction) -> OAuthResult<()> {
        if transaction.request.refresh_token().is_none() {
            return Err(OAuthError::invalid_request("refresh_token"));
        }
        Ok(())
    }

    async fn resolve_client(&self, transaction: &Transaction) -> OAuthResult<ApplicationRecord> {
        let client_id = transaction
            .request
            .client_id()
            .ok_or_else(|| OAuthError::invalid_client("A client_id is required."))?;

        let client = if let Some(cache) = &self.ctx.cache {
            if let Some(cached) = cache.get_by_client_id(client_id) {
                Some(cached)
            } else {
                let fetched = self.ctx.applications.find_by_client_id(client_id).await?;
                if let Some(record) = &fetched {
                    cache.put(record.clone());
                }
                fetched
            }
        } else {
            self.ctx.applications.find_by_client_id(client_id).await?
        };

        let client = client.ok_or_else(|| OAuthError::invalid_client("The specified client could not be found."))?;

        match client.client_type {
            ClientType::Public => {
                if transaction.request.client_secret().is_some() {
                    return Err(OAuthError::invalid_client("Public clients must not send a client_secret."));
                }
            }
            ClientType::Confidential | ClientType::Hybrid => {
                let presented = transaction
                    .request
                    .client_secret()
                    .ok_or_else(|| OAuthError::invalid_client("A client_secret is required for this client."))?;
                let expected = client
                    .client_secret_hash
                    .as_ref()
                    .ok_or_else(|| OAuthError::fault("token.missing_secret_hash", "Confidential client has no stored secret."))?;
                if !constant_time_eq(presented, expected.expose_secret()) {
                    return Err(OAuthError::invalid_client("The specified client credentials are invalid."));
                }
            }
        }

        Ok(client)
    }

    async fn validate_authorization_code_token(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let code = transaction.request.code().unwrap().to_string();
        let principal = self
            .ctx
            .protector
            .validate(&code, &[TokenKind::AuthorizationCode], None, self.ctx.reference_resolver.as_deref())
            .await
            .map_err(|_| OAuthError::invalid_grant("The authorization code is invalid or has expired."))?;

        let client_id = transaction.request.client_id().unwrap_or_default();
        if !principal.presenters.iter().any(|p| p == client_id) {
            return Err(OAuthError::invalid_grant("The authorization code was not issued to this client."));
        }
        if principal.is_expired(Utc::now()) {
            return Err(OAuthError::invalid_grant("The authorization code has expired."));
        }

        // redirect_uri binding.
        if principal.redirect_uri.is_some() {
            let presented = transaction.request.redirect_uri();
            match presented {
                None => return Err(OAuthError::invalid_request("redirect_uri")),
                Some(presented) if Some(presented) != principal.redirect_uri.as_deref() => {
                    return Err(OAuthError::invalid_grant("The redirect_uri does not match the one used at authorization time."));
                }
                _ => {}
            }
        }

        // PKCE verification.
        let require_pkce = transaction.options.require_pkce
            || transaction
                .properties()
                .get::<ResolvedClient>()
                .is_some_and(|c| c.0.requirements.require_pkce);
        match &principal.code_challenge {
            Some(challenge) => {
                let verifier = transaction
                    .request
                    .code_verifier()
                    .ok_or_else(|| OAuthError::invalid_request("code_verifier"))?;
                let method = principal.code_challenge_method.as_deref().unwrap_or("plain");
                if !verify_pkce(method, verifier, challenge) {
                    return Err(OAuthError::invalid_grant("The code_verifier does not match the recorded code_challenge."));
                }
            }
            None => {
                if require_pkce {
                    return Err(OAuthError::invalid_request("code_verifier"));
                }
                if transaction.request.code_verifier().is_some() {
                    return Err(OAuthError::invalid_grant("No code_challenge was recorded for this authorization code."));
                }
            }
        }

        self.validate_store_record(transaction, &principal).await?;
        transaction.properties_mut().insert(PresentedPrincipal(principal));
        Ok(())
    }

    async fn validate_refresh_token(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let token = transaction.request.refresh_token().unwrap().to_string();
        let principal = self
            .ctx
            .protector
            .validate(&token, &[TokenKind::RefreshToken], None, self.ctx.reference_resolver.as_deref())
            .await
            .map_err(|_| OAuthError::invalid_grant("The refresh token is invalid or has expired."))?;

        let client_id = transaction.request.client_id();
        if let Some(client_id) = client_id {
            if !principal.presenters.iter().any(|p| p == client_id) {
                return Err(OAuthError::invalid_grant("The refresh token was not issued to this client."));
            }
        }
        if principal.is_expired(Utc::now()) {
            return Err(OAuthError::invalid_grant("The refresh token has expired."));
        }

        self.validate_store_record(transaction, &principal).await?;
        transaction.properties_mut().insert(PresentedPrincipal(principal));
        Ok(())
    }

    async fn validate_device_code(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let code = transaction.request.device_code().unwrap().to_string();
        let principal = self
            .ctx
            .protector
            .validate(&code, &[TokenKind::DeviceCode], None, self.ctx.reference_resolver.as_deref())
            .await
            .map_err(|_| OAuthError::invalid_grant("The device code is invalid."))?;

        if principal.is_expired(Utc::now()) {
            return Err(OAuthError::expired_token("The device code has expired."));
        }

        self.validate_store_record(transaction, &principal).await?;
        transaction.properties_mut().insert(PresentedPrincipal(principal));
        Ok(())
    }

    /// Step 12-13: store-backed status/redemption checks, including
    /// refresh-token reuse-leeway and cascade revocation.
    async fn validate_store_record(&self, transaction: &mut Transaction, principal: &Principal) -> OAuthResult<()> {
        let Some(record) = self.ctx.tokens.find_by_id(&principal.token_id).await? else {
            // Degraded mode: no store-backed record; self-contained
            // payload decided validity already.
            return Ok(());
        };

        match record.status {
            TokenStatus::Valid => {}
            TokenStatus::Redeemed if principal.token_type == TokenKind::RefreshToken => {
                let leeway = transaction.options.refresh_token_reuse_leeway;
                let redeemed_at = record.redeemed_at.ok_or_else(|| {
                    OAuthError::fault("token.redeemed_without_timestamp", "Redeemed token missing redemption timestamp.")
                })?;
                let within_leeway = Utc::now() - redeemed_at <= ChronoDuration::from_std(leeway).unwrap_or_default();
                if !within_leeway {
                    if let Some(authorization_id) = &record.authorization_id {
                        self.cascade_revoke(authorization_id).await?;
                    }
                    return Err(OAuthError::invalid_grant("The refresh token has already been redeemed."));
                }
            }
            TokenStatus::Redeemed | TokenStatus::Revoked | TokenStatus::Inactive => {
                return Err(OAuthError::invalid_grant("The token is no longer valid."));
            }
        }

        if let Some(authorization_id) = &record.authorization_id {
            let authorization = self.ctx.authorizations.find_by_id(authorization_id).await?;
            if !matches!(authorization.map(|a| a.status), Some(crate::store::AuthorizationStatus::Valid)) {
                return Err(OAuthError::invalid_grant("The associated authorization is no longer valid."));
            }
        }

        transaction.properties_mut().insert(PresentedTokenRecord(record));
        Ok(())
    }

    /// Cascade-revoke every token sharing an authorization id. Concurrent racing revocations are
    /// safe because `try_revoke` uses the store's concurrency token.
    async fn cascade_revoke(&self, authorization_id: &str) -> OAuthResult<()> {
        let siblings = self.ctx.tokens.iterate_by_authorization_id(authorization_id).await?;
        for sibling in siblings {
            let _ = self.ctx.tokens.try_revoke(&sibling.id, &sibling.concurrency_token).await?;
        }
        Ok(())
    }
}

struct HandleHandler {
    ctx: RuntimeContext,
}

#[async_trait]
impl Handler for HandleHandler {
    async fn handle(&self, transaction: &mut Transaction) {
        if let Err(error) = self.handle_grant(transaction).await {
            transaction.reject(error);
            return;
        }
        transaction.handle_request();
    }
}

impl HandleHandler {
    async fn handle_grant(&self, transaction: &mut Transaction) -> OAuthResult<()> {
        let options = transaction.options.clone();
        let grant_type = transaction.request.grant_type().unwrap().to_string();
        let scopes = transaction.properties().get::<GrantedScopes>().map(|g| g.0.clone()).unwrap_or_default();
        let client = transaction.properties().get::<ResolvedClient>().map(|c| c.0.clone());

        let (subject, presenters, authorization_id, existing_principal) = match grant_type.as_str() {
            "authorization_code" | "refresh_token" | "urn:ietf:params:oauth:grant-type:device_code" => {
                let principal = &transaction.properties().get::<PresentedPrincipal>().unwrap().0;
                (principal.subject.clone(), principal.presenters.clone(), principal.authorization_id.clone(), Some(principal.clone()))
            }
            "client_credentials" => (None, vec![transaction.request.client_id().unwrap_or_default().to_string()], None, None),
            "password" => (
                Some(transaction.request.username().unwrap_or_default().to_string()),
                client.as_ref().map(|c| vec![c.client_id.clone()]).unwrap_or_default(),
                None,
                None,
            ),
            other => return Err(OAuthError::unsupported_grant_type(other)),
        };

        let access_expiry = Utc::now() + ChronoDuration::from_std(options.access_token_lifetime).unwrap_or_default();
        let mut access_builder = Principal::builder(TokenKind::AccessToken)
            .presenters(presenters.clone())
            .audiences(presenters.clone())
            .scopes(scopes.clone())
            .expires_at(access_expiry);
        if let Some(subject) = &subject {
            access_builder = access_builder.subject(subject.clone());
        }
        if let Some(authorization_id) = &authorization_id {
            access_builder = access_builder.authorization_id(authorization_id.clone());
        }
        let access_principal = access_builder.build();

        let access_token = self.mint(&access_principal, TokenKind::AccessToken).await?;
        self.persist(&access_principal, &client, Some(access_expiry)).await?;
        transaction.response.set_access_token(access_token);
        transaction.response.set_token_type("Bearer");
        transaction.response.set_expires_in(options.access_token_lifetime.as_secs() as i64);
        if !scopes.is_empty() {
            transaction.response.set_scope(scopes.join(" "));
        }

        let grants_offline = scopes.contains(&"offline_access".to_string());
        if grants_offline && options.grant_type_enabled("refresh_token") {
            let refresh_expiry = Utc::now() + ChronoDuration::from_std(options.refresh_token_lifetime).unwrap_or_default();
            let mut refresh_builder = Principal::builder(TokenKind::RefreshToken)
                .presenters(presenters.clone())
                .scopes(scopes.clone())
                .expires_at(refresh_expiry);
            if let Some(subject) = &subject {
                refresh_builder = refresh_builder.subject(subject.clone());
            }
            if let Some(authorization_id) = &authorization_id {
                refresh_builder = refresh_builder.authorization_id(authorization_id.clone());
            }
            let refresh_principal = refresh_builder.build();
            let refresh_token = self.mint(&refresh_principal, TokenKind::RefreshToken).await?;
            self.persist(&refresh_principal, &client, Some(refresh_expiry)).await?;
            transaction.response.set_refresh_token(refresh_token);

            // Rolling refresh tokens: mark the prior record redeemed
            // so it can still satisfy the reuse-leeway window, not revoked outright.
            if grant_type == "refresh_token" && options.rolling_refresh_tokens {
                if let Some(presented) = transaction.properties().get::<PresentedTokenRecord>() {
                    let _ = self.ctx.tokens.try_redeem(&presented.0.id, &presented.0.concurrency_token).await?;
                }
            }
        }

        let wants_identity_token = scopes.contains(&"openid".to_string());
        let reissue_ok = !options.reissue_identity_token_requires_openid_scope || wants_identity_token;
        if wants_identity_token && reissue_ok {
            let id_expiry = Utc::now() + ChronoDuration::from_std(options.identity_token_lifetime).unwrap_or_default();
            let mut id_builder = Principal::builder(TokenKind::IdentityToken)
                .audiences(presenters.clone())
                .expires_at(id_expiry);
            if let Some(subject) = &subject {
                id_builder = id_builder.subject(subject.clone());
            }
            if let Some(existing) = &existing_principal {
                if let Some(nonce) = &existing.nonce {
                    id_builder = id_builder.nonce(nonce.clone());
                }
            }
            let id_token = self.ctx.protector.protect(&id_builder.build(), Format::Jwt)?;
            transaction.response.set_id_token(id_token);
        }

        Ok(())
    }

    /// Record a freshly minted access/refresh token so later
    /// introspection, revocation, and reuse-detection have something to
    /// look up. Skipped only when the store rejects it;
    /// self-contained deployments may still operate in degraded mode
    /// for validation (see `ValidateHandler::validate_store_record`).
    async fn persist(
        &self,
        principal: &Principal,
        client: &Option<ApplicationRecord>,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> OAuthResult<()> {
        self.ctx
            .tokens
            .create(TokenRecord {
                id: principal.token_id.clone(),
                reference_id: None,
                kind: principal.token_type,
                status: TokenStatus::Valid,
                subject: principal.subject.clone(),
                application_id: client.as_ref().map(|c| c.id.clone()),
                authorization_id: principal.authorization_id.clone(),
                created_at: principal.created_at,
                expires_at,
                redeemed_at: None,
                payload: vec![],
                concurrency_token: String::new(),
            })
            .await?;
        Ok(())
    }

    async fn mint(&self, principal: &Principal, kind: TokenKind) -> OAuthResult<String> {
        let format = self.ctx.options.format_for(kind);
        if self.ctx.options.is_reference_kind(kind) {
            let resolver = self
                .ctx
                .reference_resolver
                .as_deref()
                .ok_or_else(|| OAuthError::fault("token.missing_resolver", "Reference tokens enabled without a resolver."))?;
            self.ctx.protector.protect_reference(principal, resolver).await
        } else {
            self.ctx.protector.protect(principal, format)
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

/// Fill a transaction's response `Message` with the standard error
/// triplet. Shared across endpoints.
pub fn apply_error(transaction: &mut Transaction, error: OAuthError) {
    transaction.response.set_error(error.code.as_str());
    if let Some(description) = &error.description {
        transaction.response.set_error_description(description.as_str());
    }
    if let Some(uri) = &error.uri {
        transaction.response.set_error_uri(uri.as_str());
    }
}

/// The token endpoint's complete pipeline.
pub struct TokenEndpoint {
    pipeline: EndpointPipeline,
}

impl TokenEndpoint {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let mut pipeline = EndpointPipeline::new();
        pipeline.extract.register(HandlerDescriptor::built_in("token.extract", order::DEFAULT, Arc::new(ExtractHandler)));
        pipeline
            .validate
            .register(HandlerDescriptor::built_in("token.validate", order::DEFAULT, Arc::new(ValidateHandler { ctx: ctx.clone() })));
        pipeline
            .handle
            .register(HandlerDescriptor::built_in("token.handle", order::DEFAULT, Arc::new(HandleHandler { ctx })));
        pipeline.apply.register(HandlerDescriptor::built_in("token.apply", order::TERMINAL, Arc::new(ApplyHandler)));
        Self { pipeline }
    }

    #[must_use]
    pub fn validate_dispatcher(&self) -> &Dispatcher {
        &self.pipeline.validate
    }

    pub async fn process(
        &self,
        host: &(dyn ExtractAndApply),
        host_request: HostRequest,
        options: Arc<OAuthOptions>,
    ) -> OAuthResult<HostResponse> {
        let request = host.extract_request(&host_request).await?;
        let mut transaction =
            Transaction::with_method(options.issuer.clone(), EndpointKind::Token, host_request.method.clone(), request, options);
        self.pipeline.run(&mut transaction).await;

        let status = match &transaction.outcome {
            Outcome::Rejected(error) => error.code.default_status(),
            _ => 200,
        };
        host.apply_response(&transaction.response, status).await
    }
}

/// Convenience bound for adapters implementing both halves of the host
/// contract.
pub trait ExtractAndApply: ExtractRequest + ApplyResponse {}
impl<T: ExtractRequest + ApplyResponse> ExtractAndApply for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthOptions;
    use crate::host::DefaultHost;
    use crate::params::Message;
    use crate::protection::jwt::JwtFormat;
    use crate::protection::keyring::{KeyRing, MasterKey, SigningKey};
    use crate::protection::opaque::OpaqueFormat;
    use crate::protection::Protector;
    use crate::store::memory::{MemoryApplicationStore, MemoryAuthorizationStore, MemoryScopeStore, MemoryTokenStore};
    use crate::store::{ApplicationRequirements, AuthorizationRecord, AuthorizationStatus};
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

    fn test_protector() -> Arc<Protector> {
        let secret = b"test-signing-secret-at-least-32-bytes!!";
        let signing_ring = Arc::new(KeyRing::new(SigningKey {
            key_id: "k1".into(),
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }));
        let master_ring = Arc::new(KeyRing::new(MasterKey { key_id: "m1".into(), secret: [9u8; 32] }));
        Arc::new(Protector::new(JwtFormat::new(signing_ring), OpaqueFormat::new(master_ring)))
    }

    fn test_ctx() -> (RuntimeContext, Arc<MemoryTokenStore>, Arc<MemoryAuthorizationStore>) {
        let options = Arc::new(OAuthOptions::default());
        let tokens = Arc::new(MemoryTokenStore::default());
        let authorizations = Arc::new(MemoryAuthorizationStore::default());
        let ctx = RuntimeContext {
            options,
            protector: test_protector(),
            applications: Arc::new(MemoryApplicationStore::default()),
            authorizations: authorizations.clone(),
            tokens: tokens.clone(),
            scopes: Arc::new(MemoryScopeStore::default()),
            cache: None,
            reference_resolver: None,
        };
        (ctx, tokens, authorizations)
    }

    #[tokio::test]
    async fn get_method_is_rejected_with_invalid_request() {
        let (ctx, _, _) = test_ctx();
        let endpoint = TokenEndpoint::new(ctx.clone());
        let mut txn = Transaction::with_method(
            "https://issuer.example",
            EndpointKind::Token,
            "GET",
            Request(Message::new()),
            ctx.options.clone(),
        );
        endpoint.pipeline.extract.dispatch(&mut txn).await;
        assert!(matches!(txn.outcome, Outcome::Rejected(ref e) if e.code == crate::error::ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn valid_refresh_token_is_accepted() {
        let (ctx, tokens, authorizations) = test_ctx();
        let authorization = authorizations
            .create(AuthorizationRecord {
                id: "18D15F73-BE2B-6867-DC01-B3C1E8AFDED0".into(),
                status: AuthorizationStatus::Valid,
                subject: Some("Bob le Bricoleur".into()),
                application_id: None,
                kind: "refresh_token".into(),
                scopes: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let principal = Principal::builder(TokenKind::RefreshToken)
            .token_id("8xLOxBtZp8")
            .subject("Bob le Bricoleur")
            .presenters(vec!["client-1".into()])
            .authorization_id(authorization.id.clone())
            .expires_at(Utc::now() + ChronoDuration::days(1))
            .build();
        let refresh_token = ctx.protector.protect(&principal, Format::Jwt).unwrap();

        tokens
            .create(TokenRecord {
                id: "8xLOxBtZp8".into(),
                reference_id: None,
                kind: TokenKind::RefreshToken,
                status: TokenStatus::Valid,
                subject: Some("Bob le Bricoleur".into()),
                application_id: None,
                authorization_id: Some(authorization.id.clone()),
                created_at: Utc::now(),
                expires_at: None,
                redeemed_at: None,
                payload: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let endpoint = TokenEndpoint::new(ctx.clone());
        let host_request = HostRequest::post(format!("grant_type=refresh_token&refresh_token={refresh_token}"));
        let response = endpoint.process(&DefaultHost, host_request, ctx.options.clone()).await.unwrap();

        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert!(body.get("access_token").is_some());
        assert_eq!(body.get("token_type").unwrap(), "Bearer");
        assert!(response.headers.iter().any(|(k, v)| k == "Cache-Control" && v == "no-store"));
    }

    #[tokio::test]
    async fn reused_refresh_outside_leeway_cascade_revokes() {
        let (mut ctx, tokens, authorizations) = test_ctx();
        if let Some(options) = Arc::get_mut(&mut ctx.options) {
            options.refresh_token_reuse_leeway = std::time::Duration::from_secs(0);
        }

        let authorization = authorizations
            .create(AuthorizationRecord {
                id: "auth-1".into(),
                status: AuthorizationStatus::Valid,
                subject: Some("Bob".into()),
                application_id: None,
                kind: "refresh_token".into(),
                scopes: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let principal = Principal::builder(TokenKind::RefreshToken)
            .token_id("rt-1")
            .subject("Bob")
            .presenters(vec!["client-1".into()])
            .authorization_id(authorization.id.clone())
            .expires_at(Utc::now() + ChronoDuration::days(1))
            .build();
        let refresh_token = ctx.protector.protect(&principal, Format::Jwt).unwrap();

        let sibling = tokens
            .create(TokenRecord {
                id: "rt-1".into(),
                reference_id: None,
                kind: TokenKind::RefreshToken,
                status: TokenStatus::Redeemed,
                subject: Some("Bob".into()),
                application_id: None,
                authorization_id: Some(authorization.id.clone()),
                created_at: Utc::now(),
                expires_at: None,
                redeemed_at: Some(Utc::now() - ChronoDuration::minutes(1)),
                payload: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();
        let access_sibling = tokens
            .create(TokenRecord {
                id: "at-1".into(),
                reference_id: None,
                kind: TokenKind::AccessToken,
                status: TokenStatus::Valid,
                subject: Some("Bob".into()),
                application_id: None,
                authorization_id: Some(authorization.id.clone()),
                created_at: Utc::now(),
                expires_at: None,
                redeemed_at: None,
                payload: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let endpoint = TokenEndpoint::new(ctx.clone());
        let host_request = HostRequest::post(format!("grant_type=refresh_token&refresh_token={refresh_token}"));
        let response = endpoint.process(&DefaultHost, host_request, ctx.options.clone()).await.unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_grant");

        let revoked_sibling = tokens.find_by_id(&access_sibling.id).await.unwrap().unwrap();
        assert_eq!(revoked_sibling.status, TokenStatus::Revoked);
        let _ = sibling;
    }

    async fn register_confidential_client(ctx: &RuntimeContext) {
        ctx.applications
            .create(ApplicationRecord {
                id: "app-1".into(),
                client_id: "confidential-client".into(),
                client_type: ClientType::Confidential,
                client_secret_hash: Some(secrecy::SecretString::new("correct-horse-battery-staple".into())),
                redirect_uris: vec![],
                post_logout_redirect_uris: vec![],
                permitted_endpoints: vec![EndpointKind::Token],
                permitted_grant_types: vec!["refresh_token".into()],
                permitted_scopes: vec![],
                requirements: ApplicationRequirements { require_pkce: false },
                concurrency_token: String::new(),
            })
            .await
            .unwrap();
    }

    async fn issue_confidential_refresh_token(ctx: &RuntimeContext, tokens: &Arc<MemoryTokenStore>, authorizations: &Arc<MemoryAuthorizationStore>) -> String {
        let authorization = authorizations
            .create(AuthorizationRecord {
                id: "auth-confidential".into(),
                status: AuthorizationStatus::Valid,
                subject: Some("Bob".into()),
                application_id: Some("app-1".into()),
                kind: "refresh_token".into(),
                scopes: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        let principal = Principal::builder(TokenKind::RefreshToken)
            .token_id("rt-confidential")
            .subject("Bob")
            .presenters(vec!["confidential-client".into()])
            .authorization_id(authorization.id.clone())
            .expires_at(Utc::now() + ChronoDuration::days(1))
            .build();
        let refresh_token = ctx.protector.protect(&principal, Format::Jwt).unwrap();

        tokens
            .create(TokenRecord {
                id: "rt-confidential".into(),
                reference_id: None,
                kind: TokenKind::RefreshToken,
                status: TokenStatus::Valid,
                subject: Some("Bob".into()),
                application_id: Some("app-1".into()),
                authorization_id: Some(authorization.id.clone()),
                created_at: Utc::now(),
                expires_at: None,
                redeemed_at: None,
                payload: vec![],
                concurrency_token: String::new(),
            })
            .await
            .unwrap();

        refresh_token
    }

    #[tokio::test]
    async fn confidential_client_with_correct_secret_is_accepted() {
        let (ctx, tokens, authorizations) = test_ctx();
        register_confidential_client(&ctx).await;
        let refresh_token = issue_confidential_refresh_token(&ctx, &tokens, &authorizations).await;

        let endpoint = TokenEndpoint::new(ctx.clone());
        let host_request = HostRequest::post(format!(
            "grant_type=refresh_token&refresh_token={refresh_token}&client_id=confidential-client&client_secret=correct-horse-battery-staple"
        ));
        let response = endpoint.process(&DefaultHost, host_request, ctx.options.clone()).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.unwrap().get("access_token").is_some());
    }

    #[tokio::test]
    async fn confidential_client_with_wrong_secret_is_rejected() {
        let (ctx, tokens, authorizations) = test_ctx();
        register_confidential_client(&ctx).await;
        let refresh_token = issue_confidential_refresh_token(&ctx, &tokens, &authorizations).await;

        let endpoint = TokenEndpoint::new(ctx.clone());
        let host_request = HostRequest::post(format!(
            "grant_type=refresh_token&refresh_token={refresh_token}&client_id=confidential-client&client_secret=not-the-secret"
        ));
        let response = endpoint.process(&DefaultHost, host_request, ctx.options.clone()).await.unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_client");
    }
}
