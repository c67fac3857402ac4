//! Transaction & dispatcher
//!
//! The per-request mutable context and the ordered, filterable handler
//! pipeline that drives it.

pub mod dispatcher;
pub mod events;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::OAuthOptions;
use crate::error::OAuthError;
use crate::params::{Request, Response};

/// The endpoint a transaction was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EndpointKind {
    Authorization,
    Token,
    Introspection,
    Revocation,
    Device,
    Verification,
    Userinfo,
    Logout,
    Configuration,
    Cryptography,
    Unknown,
}

/// How a transaction concluded. Exactly one holds at exit.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Pipeline proceeds to the next handler.
    Continue,
    /// Pipeline stops; the response is considered finalized.
    RequestHandled,
    /// Pipeline stops; the host is told to pass through.
    RequestSkipped,
    /// Pipeline stops; an error response is synthesized by the terminal
    /// apply handler.
    Rejected(OAuthError),
}

impl Outcome {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Typed heterogeneous map for inter-handler communication within one
/// transaction. Untyped string
/// keys are reserved for cross-host interchange and are not modeled here
/// since the core never crosses a host boundary through the bag.
#[derive(Default)]
pub struct PropertyBag {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl PropertyBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut::<T>())
    }

    #[must_use]
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

/// A single request's mutable context.
/// Never shared across requests: owned by one task for its lifetime.
pub struct Transaction {
    pub issuer: String,
    pub endpoint: EndpointKind,
    pub http_method: String,
    pub request: Request,
    pub response: Response,
    pub options: Arc<OAuthOptions>,
    pub outcome: Outcome,
    properties: PropertyBag,
}

impl Transaction {
    #[must_use]
    pub fn new(issuer: impl Into<String>, endpoint: EndpointKind, request: Request, options: Arc<OAuthOptions>) -> Self {
        Self::with_method(issuer, endpoint, "POST", request, options)
    }

    #[must_use]
    pub fn with_method(
        issuer: impl Into<String>,
        endpoint: EndpointKind,
        http_method: impl Into<String>,
        request: Request,
        options: Arc<OAuthOptions>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            endpoint,
            http_method: http_method.into(),
            request,
            response: Response::default(),
            options,
            outcome: Outcome::Continue,
            properties: PropertyBag::new(),
        }
    }

    #[must_use]
    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    /// Mark the transaction handled; the pipeline stops here.
    pub fn handle_request(&mut self) {
        self.outcome = Outcome::RequestHandled;
    }

    /// Mark the transaction skipped; the host should pass through.
    pub fn skip_request(&mut self) {
        self.outcome = Outcome::RequestSkipped;
    }

    /// Reject with an explicit error; the pipeline stops here.
    pub fn reject(&mut self, error: OAuthError) {
        self.outcome = Outcome::Rejected(error);
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bag_round_trips_by_type() {
        let mut bag = PropertyBag::new();
        bag.insert(42_i32);
        bag.insert("hello".to_string());
        assert_eq!(bag.get::<i32>(), Some(&42));
        assert_eq!(bag.get::<String>(), Some(&"hello".to_string()));
        assert_eq!(bag.remove::<i32>(), Some(42));
        assert_eq!(bag.get::<i32>(), None);
    }
}
