//! OAuth 2.0 / OpenID Connect protocol core.
//!
//! A framework-agnostic implementation of the authorization-server,
//! resource-validation, and relying-party-client roles, sharing one
//! parameter model, transaction/dispatcher pipeline, and token
//! protection layer.
//!
//! The core never touches HTTP, a database, or a clock directly: it is
//! driven by a host through [`host::ExtractRequest`]/[`host::ApplyResponse`],
//! persisted through the [`store`] traits, and configured through an
//! immutable [`config::OAuthOptions`] snapshot. See each endpoint module
//! under [`endpoints`] for the state machine driving that surface.

pub mod config;
pub mod endpoints;
pub mod error;
pub mod host;
pub mod params;
pub mod protection;
pub mod store;
pub mod transaction;

pub use config::OAuthOptions;
pub use error::{ErrorCode, OAuthError, OAuthResult};
pub use host::{ApplyResponse, ExtractRequest, HostRequest, HostResponse};
pub use params::{Message, Parameter, Request, Response};
pub use protection::{Format, Principal, Protector, TokenKind};
pub use transaction::{EndpointKind, Outcome, Transaction};
