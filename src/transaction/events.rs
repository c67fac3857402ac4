//! Event types for the Extract/Validate/Handle/Apply flow and the
//! outer host-initiated flows.

/// The four events every endpoint pipeline fires, in strict order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreEvent {
    Extract,
    Validate,
    Handle,
    Apply,
}

/// The sibling flows an outer `ProcessRequest` context coordinates for
/// host-initiated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessEvent {
    ProcessRequest,
    ProcessAuthentication,
    ProcessSignIn,
    ProcessSignOut,
    ProcessChallenge,
    ProcessError,
}

/// A complete per-endpoint pipeline: one [`super::dispatcher::Dispatcher`]
/// per event, run in strict order with a short-circuit on any terminal
/// outcome raised by an earlier stage.
pub struct EndpointPipeline {
    pub extract: super::dispatcher::Dispatcher,
    pub validate: super::dispatcher::Dispatcher,
    pub handle: super::dispatcher::Dispatcher,
    pub apply: super::dispatcher::Dispatcher,
}

impl EndpointPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extract: super::dispatcher::Dispatcher::new(),
            validate: super::dispatcher::Dispatcher::new(),
            handle: super::dispatcher::Dispatcher::new(),
            apply: super::dispatcher::Dispatcher::new(),
        }
    }

    /// Run Extract, Validate, Handle, then always Apply: the Apply event
    /// is the terminal event responsible for serializing either the
    /// built response or a synthesized error response.
    pub async fn run(&self, transaction: &mut super::Transaction) {
        for stage in [&self.extract, &self.validate, &self.handle] {
            if transaction.is_terminal() {
                break;
            }
            stage.dispatch(transaction).await;
        }
        self.apply.dispatch(transaction).await;
    }
}

impl Default for EndpointPipeline {
    fn default() -> Self {
        Self::new()
    }
}
