//! Handler descriptors, filters, and the dispatch protocol.

use std::sync::Arc;

use async_trait::async_trait;

use super::Transaction;

/// Whether a handler came from the built-in default pipeline or was
/// registered by a plug-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    BuiltIn,
    Custom,
}

/// A predicate over the transaction. Inactive filters skip their
/// descriptor; filters compose by AND.
pub trait Filter: Send + Sync {
    fn is_active(&self, transaction: &Transaction) -> bool;
}

/// Always-active filter, used as the default when no filter is supplied.
pub struct AlwaysActive;

impl Filter for AlwaysActive {
    fn is_active(&self, _transaction: &Transaction) -> bool {
        true
    }
}

/// A handler participating in one event's pipeline.
///
/// A handler mutates the transaction's outcome directly via
/// `Transaction::handle_request` / `skip_request` / `reject`; returning
/// without touching the outcome means "proceed".
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, transaction: &mut Transaction);
}

/// Ordering constants for the default pipelines, centralized so
/// plug-in handlers can bracket them.
pub mod order {
    pub const EARLY: i32 = -1000;
    pub const DEFAULT: i32 = 0;
    pub const LATE: i32 = 1000;
    pub const TERMINAL: i32 = 10_000;
}

/// An immutable record describing one handler's place in a pipeline.
pub struct HandlerDescriptor {
    pub name: &'static str,
    pub order: i32,
    pub kind: HandlerKind,
    pub filter: Arc<dyn Filter>,
    pub handler: Arc<dyn Handler>,
    // Registration index, used to break order ties. Assigned by
    // `Dispatcher::register`, not by the caller.
    registration_index: usize,
}

impl HandlerDescriptor {
    #[must_use]
    pub fn built_in(name: &'static str, order: i32, handler: Arc<dyn Handler>) -> Self {
        Self {
            name,
            order,
            kind: HandlerKind::BuiltIn,
            filter: Arc::new(AlwaysActive),
            handler,
            registration_index: 0,
        }
    }

    #[must_use]
    pub fn custom(name: &'static str, order: i32, handler: Arc<dyn Handler>) -> Self {
        Self {
            name,
            order,
            kind: HandlerKind::Custom,
            filter: Arc::new(AlwaysActive),
            handler,
            registration_index: 0,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filter = filter;
        self
    }
}

/// Sorts registered descriptors by `(order, registration_index)` and
/// runs each active one in turn, stopping as soon as the transaction's
/// outcome becomes terminal.
#[derive(Default)]
pub struct Dispatcher {
    descriptors: Vec<HandlerDescriptor>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut descriptor: HandlerDescriptor) {
        descriptor.registration_index = self.descriptors.len();
        self.descriptors.push(descriptor);
    }

    /// Run every active descriptor in order against `transaction`,
    /// stopping at the first terminal outcome.
    pub async fn dispatch(&self, transaction: &mut Transaction) {
        let mut ordered: Vec<&HandlerDescriptor> = self.descriptors.iter().collect();
        ordered.sort_by_key(|d| (d.order, d.registration_index));

        for descriptor in ordered {
            if transaction.is_terminal() {
                break;
            }
            if !descriptor.filter.is_active(transaction) {
                continue;
            }
            tracing::debug!(handler = descriptor.name, "dispatching handler");
            descriptor.handler.handle(transaction).await;
        }
    }
}
