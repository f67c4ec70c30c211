//! Stream event types for request progress.
//!
//! This module defines the contract for events emitted while a request runs.
//! Events are serializable so a transport layer can forward them as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quay_types::PermissionChoice;

/// Events emitted during a single request.
///
/// Events for one request form a strictly ordered, finite sequence that
/// terminates in exactly one of `Completed`, `Cancelled`, or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text chunk from the assistant.
    TextDelta { text: String },

    /// A tool invocation has started execution.
    ToolCallStarted {
        id: String,
        name: String,
        input: Value,
    },

    /// A tool invocation has completed.
    ToolCallResult { id: String, output: Value, ok: bool },

    /// The pipeline is suspended waiting for human approval.
    ///
    /// Carries the request id the caller must pass to `respond_to_permission`.
    PermissionRequested {
        request_id: String,
        prompt: String,
        choices: Vec<PermissionChoice>,
    },

    /// The request was cancelled before completing.
    Cancelled {
        /// Partial assistant text produced before cancellation.
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_content: Option<String>,
    },

    /// The request failed.
    Error {
        /// One-line summary
        message: String,
        /// Optional additional details
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// The request completed successfully.
    Completed {
        /// Final accumulated text from the assistant.
        final_text: String,
    },
}

impl StreamEvent {
    /// Returns true if this event ends the request's sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Completed { .. }
                | StreamEvent::Cancelled { .. }
                | StreamEvent::Error { .. }
        )
    }
}
