//! OAuth/OIDC error taxonomy
//!
//! A single error type spans the core, matching the externally visible
//! taxonomy (RFC 6749 §5.2 plus the resource-server and device-flow
//! extensions the rest of the crate implements).

use serde::{Deserialize, Serialize};

/// Result type alias for core operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

/// Externally visible OAuth/OIDC error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    InvalidToken,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedTokenType,
    AccessDenied,
    InsufficientScope,
    InsufficientAccess,
    MissingToken,
    ExpiredToken,
    ServerError,
    TemporarilyUnavailable,
}

impl ErrorCode {
    /// The wire value used in the `error` response parameter.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::InvalidToken => "invalid_token",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedTokenType => "unsupported_token_type",
            Self::AccessDenied => "access_denied",
            Self::InsufficientScope => "insufficient_scope",
            Self::InsufficientAccess => "insufficient_access",
            Self::MissingToken => "missing_token",
            Self::ExpiredToken => "expired_token",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    /// Default HTTP status for this error code; hosts may override it,
    /// this is advisory.
    #[must_use]
    pub fn default_status(self) -> u16 {
        match self {
            Self::InvalidToken | Self::MissingToken => 401,
            Self::InsufficientAccess | Self::InsufficientScope => 403,
            Self::ServerError => 500,
            _ => 400,
        }
    }
}

/// The error, description, and uri carried by a handler rejection.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code:?}: {description:?}")]
pub struct OAuthError {
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Stable identifier for internal faults, never shown to callers
    /// beyond the generic `server_error` code.
    #[serde(skip)]
    pub fault_id: Option<&'static str>,
}

impl OAuthError {
    /// Construct a plain rejection with no description or uri.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            description: None,
            uri: None,
            fault_id: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an error_uri.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// `invalid_request`, optionally synthesizing a default description
    /// from the offending parameter name when none is supplied.
    #[must_use]
    pub fn invalid_request(parameter: &str) -> Self {
        Self::new(ErrorCode::InvalidRequest)
            .with_description(format!("The '{parameter}' parameter is missing or invalid."))
    }

    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidClient).with_description(description)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant).with_description(description)
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidScope).with_description(description)
    }

    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken).with_description(description)
    }

    #[must_use]
    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnauthorizedClient).with_description(description)
    }

    #[must_use]
    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(ErrorCode::UnsupportedGrantType)
            .with_description(format!("The grant type '{grant_type}' is not supported."))
    }

    #[must_use]
    pub fn unsupported_token_type(hint: &str) -> Self {
        Self::new(ErrorCode::UnsupportedTokenType)
            .with_description(format!("The token type '{hint}' is not supported."))
    }

    #[must_use]
    pub fn expired_token(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExpiredToken).with_description(description)
    }

    /// An internal/impossible-state fault. Always surfaces externally as
    /// `server_error`; `id` is a stable identifier for log correlation,
    /// never shown to the caller, and is never retried.
    #[must_use]
    pub fn fault(id: &'static str, description: impl Into<String>) -> Self {
        tracing::error!(fault_id = id, "internal fault");
        Self {
            code: ErrorCode::ServerError,
            description: Some(description.into()),
            uri: None,
            fault_id: Some(id),
        }
    }
}
