//! Engine error taxonomy.
//!
//! Lookups that are expected to miss (`get_history`, `cancel_request`,
//! `respond_to_permission`) return `Option`/`bool` instead of an error.
//! `Cancelled` and `Error` outcomes travel as terminal stream events, not as
//! `EngineError`.

use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The session id is not known to the store.
    #[error("unknown session: {0}")]
    SessionNotFound(String),

    /// A request is already active for this session; cancel it first.
    #[error("a request is already active for session {0}")]
    RequestConflict(String),
}
