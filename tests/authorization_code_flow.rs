//! End-to-end authorization-code flow: a code minted exactly the way an
//! authorization-endpoint host would mint it after consent, redeemed at
//! the token endpoint with PKCE.

mod common;

use chrono::{Duration, Utc};

use oxide_oidc::endpoints::token::TokenEndpoint;
use oxide_oidc::host::{DefaultHost, HostRequest};
use oxide_oidc::protection::{Format, Principal, TokenKind};
use oxide_oidc::store::{ApplicationRecord, ApplicationRequirements, ApplicationStore, ClientType, TokenRecord, TokenStatus, TokenStore};
use oxide_oidc::transaction::EndpointKind;

async fn register_client(h: &common::Harness, require_pkce: bool) {
    h.applications
        .create(ApplicationRecord {
            id: "app-1".into(),
            client_id: "native-app".into(),
            client_type: ClientType::Public,
            client_secret_hash: None,
            redirect_uris: vec!["https://client.example/callback".into()],
            post_logout_redirect_uris: vec![],
            permitted_endpoints: vec![EndpointKind::Authorization, EndpointKind::Token],
            permitted_grant_types: vec!["authorization_code".into()],
            permitted_scopes: vec!["openid".into(), "profile".into()],
            requirements: ApplicationRequirements { require_pkce },
            concurrency_token: String::new(),
        })
        .await
        .unwrap();
}

async fn issue_code(h: &common::Harness, code_challenge: Option<(&str, &str)>) -> String {
    let mut builder = Principal::builder(TokenKind::AuthorizationCode)
        .presenters(vec!["native-app".into()])
        .subject("user-1")
        .scopes(vec!["openid".into(), "profile".into()])
        .redirect_uri("https://client.example/callback")
        .expires_at(Utc::now() + Duration::minutes(5));
    if let Some((challenge, method)) = code_challenge {
        builder = builder.code_challenge(challenge, method);
    }
    let principal = builder.build();
    let code = h.ctx.protector.protect(&principal, Format::Jwt).unwrap();

    h.tokens
        .create(TokenRecord {
            id: principal.token_id.clone(),
            reference_id: None,
            kind: TokenKind::AuthorizationCode,
            status: TokenStatus::Valid,
            subject: Some("user-1".into()),
            application_id: Some("app-1".into()),
            authorization_id: None,
            created_at: principal.created_at,
            expires_at: principal.expires_at,
            redeemed_at: None,
            payload: Vec::new(),
            concurrency_token: String::new(),
        })
        .await
        .unwrap();

    code
}

#[tokio::test]
async fn valid_pkce_exchange_succeeds() {
    let h = common::harness();
    register_client(&h, true).await;

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    let code = issue_code(&h, Some((challenge, "S256"))).await;

    let endpoint = TokenEndpoint::new(h.ctx.clone());
    let response = endpoint
        .process(
            &DefaultHost,
            HostRequest::post(format!(
                "grant_type=authorization_code&client_id=native-app&code={code}&redirect_uri=https%3A%2F%2Fclient.example%2Fcallback&code_verifier={verifier}"
            )),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert!(body.get("access_token").is_some());
    assert_eq!(body.get("scope").unwrap(), "openid profile");
}

#[tokio::test]
async fn wrong_verifier_is_rejected_as_invalid_grant() {
    let h = common::harness();
    register_client(&h, true).await;

    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    let code = issue_code(&h, Some((challenge, "S256"))).await;

    let endpoint = TokenEndpoint::new(h.ctx.clone());
    let response = endpoint
        .process(
            &DefaultHost,
            HostRequest::post(format!(
                "grant_type=authorization_code&client_id=native-app&code={code}&redirect_uri=https%3A%2F%2Fclient.example%2Fcallback&code_verifier=not-the-right-verifier"
            )),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    let body = response.body.unwrap();
    assert_eq!(body.get("error").unwrap(), "invalid_grant");
}

#[tokio::test]
async fn missing_verifier_when_required_is_invalid_request() {
    let h = common::harness();
    register_client(&h, true).await;

    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    let code = issue_code(&h, Some((challenge, "S256"))).await;

    let endpoint = TokenEndpoint::new(h.ctx.clone());
    let response = endpoint
        .process(
            &DefaultHost,
            HostRequest::post(format!(
                "grant_type=authorization_code&client_id=native-app&code={code}&redirect_uri=https%3A%2F%2Fclient.example%2Fcallback"
            )),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_request");
}

#[tokio::test]
async fn mismatched_redirect_uri_is_rejected() {
    let h = common::harness();
    register_client(&h, false).await;
    let code = issue_code(&h, None).await;

    let endpoint = TokenEndpoint::new(h.ctx.clone());
    let response = endpoint
        .process(
            &DefaultHost,
            HostRequest::post(format!(
                "grant_type=authorization_code&client_id=native-app&code={code}&redirect_uri=https%3A%2F%2Fevil.example%2Fcallback"
            )),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_grant");
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let h = common::harness();
    register_client(&h, false).await;

    let principal = Principal::builder(TokenKind::AuthorizationCode)
        .presenters(vec!["native-app".into()])
        .subject("user-1")
        .redirect_uri("https://client.example/callback")
        .expires_at(Utc::now() - Duration::minutes(1))
        .build();
    let code = h.ctx.protector.protect(&principal, Format::Jwt).unwrap();
    h.tokens
        .create(TokenRecord {
            id: principal.token_id.clone(),
            reference_id: None,
            kind: TokenKind::AuthorizationCode,
            status: TokenStatus::Valid,
            subject: Some("user-1".into()),
            application_id: Some("app-1".into()),
            authorization_id: None,
            created_at: principal.created_at,
            expires_at: principal.expires_at,
            redeemed_at: None,
            payload: Vec::new(),
            concurrency_token: String::new(),
        })
        .await
        .unwrap();

    let endpoint = TokenEndpoint::new(h.ctx.clone());
    let response = endpoint
        .process(
            &DefaultHost,
            HostRequest::post(format!(
                "grant_type=authorization_code&client_id=native-app&code={code}&redirect_uri=https%3A%2F%2Fclient.example%2Fcallback"
            )),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_grant");
}

#[tokio::test]
async fn get_method_is_rejected() {
    let h = common::harness();
    let endpoint = TokenEndpoint::new(h.ctx.clone());
    let response = endpoint
        .process(
            &DefaultHost,
            HostRequest { method: "GET".into(), form_body: String::new(), basic_auth: None },
            h.ctx.options.clone(),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_request");
}
