//! End-to-end device flow (RFC 8628): device authorization request,
//! user-facing verification, then redemption at the token endpoint.

mod common;

use oxide_oidc::endpoints::device::DeviceEndpoint;
use oxide_oidc::endpoints::token::TokenEndpoint;
use oxide_oidc::endpoints::verification::VerificationEndpoint;
use oxide_oidc::host::{DefaultHost, HostRequest};
use oxide_oidc::params::{Message, Request};
use oxide_oidc::store::{ApplicationRecord, ApplicationRequirements, ApplicationStore, ClientType};
use oxide_oidc::transaction::{EndpointKind, Outcome, Transaction};

async fn register_device_client(h: &common::Harness) {
    h.applications
        .create(ApplicationRecord {
            id: "app-1".into(),
            client_id: "tv-app".into(),
            client_type: ClientType::Public,
            client_secret_hash: None,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            permitted_endpoints: vec![EndpointKind::Device, EndpointKind::Token],
            permitted_grant_types: vec!["urn:ietf:params:oauth:grant-type:device_code".into()],
            permitted_scopes: vec!["openid".into()],
            requirements: ApplicationRequirements { require_pkce: false },
            concurrency_token: String::new(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn approved_device_code_redeems_for_an_access_token() {
    let h = common::harness();
    register_device_client(&h).await;

    let device = DeviceEndpoint::new(h.ctx.clone());
    let issued = device
        .process(&DefaultHost, HostRequest::post("client_id=tv-app&scope=openid"), h.ctx.options.clone())
        .await
        .unwrap();
    assert_eq!(issued.status, 200);
    let issued_body = issued.body.unwrap();
    let device_code = issued_body.get("device_code").unwrap().as_str().unwrap().to_string();
    let user_code = issued_body.get("user_code").unwrap().as_str().unwrap().to_string();

    let verification = VerificationEndpoint::new(h.ctx.clone());
    let mut transaction = Transaction::with_method(
        h.ctx.options.issuer.clone(),
        EndpointKind::Verification,
        "POST",
        Request(Message::read_form(&format!("user_code={user_code}&decision=approve&subject=viewer-1"))),
        h.ctx.options.clone(),
    );
    verification.run(&mut transaction).await;
    assert!(matches!(transaction.outcome, Outcome::RequestSkipped));

    let token = TokenEndpoint::new(h.ctx.clone());
    let response = token
        .process(
            &DefaultHost,
            HostRequest::post(format!("grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={device_code}")),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert!(body.get("access_token").is_some());
}

#[tokio::test]
async fn denied_device_code_cannot_be_redeemed() {
    let h = common::harness();
    register_device_client(&h).await;

    let device = DeviceEndpoint::new(h.ctx.clone());
    let issued = device
        .process(&DefaultHost, HostRequest::post("client_id=tv-app"), h.ctx.options.clone())
        .await
        .unwrap();
    let issued_body = issued.body.unwrap();
    let device_code = issued_body.get("device_code").unwrap().as_str().unwrap().to_string();
    let user_code = issued_body.get("user_code").unwrap().as_str().unwrap().to_string();

    let verification = VerificationEndpoint::new(h.ctx.clone());
    let mut transaction = Transaction::with_method(
        h.ctx.options.issuer.clone(),
        EndpointKind::Verification,
        "POST",
        Request(Message::read_form(&format!("user_code={user_code}&decision=deny"))),
        h.ctx.options.clone(),
    );
    verification.run(&mut transaction).await;
    assert!(matches!(transaction.outcome, Outcome::Rejected(_)));

    let token = TokenEndpoint::new(h.ctx.clone());
    let response = token
        .process(
            &DefaultHost,
            HostRequest::post(format!("grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={device_code}")),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_grant");
}

#[tokio::test]
async fn polling_before_verification_is_still_invalid_grant() {
    let h = common::harness();
    register_device_client(&h).await;

    let device = DeviceEndpoint::new(h.ctx.clone());
    let issued = device
        .process(&DefaultHost, HostRequest::post("client_id=tv-app"), h.ctx.options.clone())
        .await
        .unwrap();
    let device_code = issued.body.unwrap().get("device_code").unwrap().as_str().unwrap().to_string();

    let token = TokenEndpoint::new(h.ctx.clone());
    let response = token
        .process(
            &DefaultHost,
            HostRequest::post(format!("grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={device_code}")),
            h.ctx.options.clone(),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap().get("error").unwrap(), "invalid_grant");
}
