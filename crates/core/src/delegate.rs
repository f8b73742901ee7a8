//! Delegate observers and one-shot completion callbacks

use crate::request::Request;
use std::fmt;
use std::sync::Arc;

/// Long-lived observer of request outcomes.
///
/// A request holds its delegate weakly: dropping the delegate silently
/// disables delegate notification. Both hooks run on the agent's
/// notification queue, before the completion callback.
#[allow(unused_variables)]
pub trait RequestDelegate: Send + Sync {
    /// The request completed successfully
    fn request_finished(&self, request: &Request) {}

    /// The request failed
    fn request_failed(&self, request: &Request) {}
}

/// Callback receiving the settled request
pub type CompletionCallback = Arc<dyn Fn(&Request) + Send + Sync>;

/// Success/failure callback pair, consumed by the next terminal event
#[derive(Clone)]
pub(crate) struct Completion {
    pub(crate) success: CompletionCallback,
    pub(crate) failure: CompletionCallback,
}

impl Completion {
    pub(crate) fn new(
        success: impl Fn(&Request) + Send + Sync + 'static,
        failure: impl Fn(&Request) + Send + Sync + 'static,
    ) -> Self {
        Self {
            success: Arc::new(success),
            failure: Arc::new(failure),
        }
    }

    pub(crate) fn for_outcome(&self, success: bool) -> &CompletionCallback {
        if success { &self.success } else { &self.failure }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion { .. }")
    }
}
