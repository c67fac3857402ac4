//! Host contract
//!
//! The narrow interfaces the core depends on to exchange bytes with
//! whatever web-server runtime hosts it.
//! The core never reads HTTP itself.

use async_trait::async_trait;

use crate::error::OAuthResult;
use crate::params::{Request, Response};

/// A minimal view of the inbound request the host delivers: method,
/// form/query body, and an optional HTTP Basic authentication header.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub method: String,
    pub form_body: String,
    pub basic_auth: Option<(String, String)>,
}

impl HostRequest {
    #[must_use]
    pub fn post(form_body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            form_body: form_body.into(),
            basic_auth: None,
        }
    }

    #[must_use]
    pub fn with_basic_auth(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.basic_auth = Some((client_id.into(), client_secret.into()));
        self
    }
}

/// What the core hands back to the host to write out.
#[derive(Debug, Clone, Default)]
pub struct HostResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

/// Populates a [`Request`] `Message` from the host's surface.
#[async_trait]
pub trait ExtractRequest: Send + Sync {
    async fn extract_request(&self, host_request: &HostRequest) -> OAuthResult<Request>;
}

/// Writes status/headers/body from a [`Response`].
#[async_trait]
pub trait ApplyResponse: Send + Sync {
    async fn apply_response(&self, response: &Response, status: u16) -> OAuthResult<HostResponse>;
}

/// The default host adapter used by tests: form-urlencoded extraction,
/// JSON application.
pub struct DefaultHost;

#[async_trait]
impl ExtractRequest for DefaultHost {
    async fn extract_request(&self, host_request: &HostRequest) -> OAuthResult<Request> {
        let mut request = Request(crate::params::Message::read_form(&host_request.form_body));
        if let Some((client_id, client_secret)) = &host_request.basic_auth {
            if request.client_id().is_none() {
                request.set_client_id(client_id.as_str());
            }
            if request.client_secret().is_none() {
                request.set_client_secret(client_secret.as_str());
            }
        }
        Ok(request)
    }
}

#[async_trait]
impl ApplyResponse for DefaultHost {
    async fn apply_response(&self, response: &Response, status: u16) -> OAuthResult<HostResponse> {
        Ok(HostResponse {
            status,
            headers: vec![("Cache-Control".to_string(), "no-store".to_string())],
            body: Some(response.0.write_json()),
        })
    }
}
