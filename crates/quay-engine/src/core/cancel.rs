//! Per-request cooperative cancellation.
//!
//! One `ActiveRequest` exists per session while a request is in flight. Its
//! token is advisory: pipelines observe it at safe points (before producing
//! the next event, before invoking a tool) and unwind to a `Cancelled`
//! terminal event. Nothing is preempted.

use tokio_util::sync::CancellationToken;

/// Error signalling that the current request was cancelled.
///
/// Pipelines propagate this out of `run`; the orchestrator converts it into
/// the `Cancelled` terminal event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestCancelled;

impl std::fmt::Display for RequestCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request cancelled")
    }
}

impl std::error::Error for RequestCancelled {}

/// The exclusive token for a session's in-flight request.
///
/// Created at admission, dropped when the request reaches a terminal event.
#[derive(Debug)]
pub struct ActiveRequest {
    token: CancellationToken,
}

impl ActiveRequest {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a clone of the cancellation token for the running pipeline.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Triggers the cancellation signal. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ActiveRequest {
    fn default() -> Self {
        Self::new()
    }
}
