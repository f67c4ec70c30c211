//! The session orchestrator.
//!
//! Owns the session store and permission gate, enforces the
//! one-active-request-per-session invariant, and drives each admitted
//! request through streaming, suspension, and exactly one terminal event.
//!
//! Request lifecycle: `Idle → Admitted → Streaming ⇄ SuspendedForPermission
//! → Terminal{Completed|Cancelled|Error}`. Admission appends the user entry
//! to the session log before any event is produced; terminal handling
//! persists the assistant text (full or partial) and releases the session
//! before the terminal event is delivered.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use quay_types::{ImageContent, Message, PermissionChoice, SessionSummary};

use crate::config::Config;
use crate::core::cancel::RequestCancelled;
use crate::core::error::EngineError;
use crate::core::events::StreamEvent;
use crate::core::permission::PermissionGate;
use crate::core::pipeline::{Pipeline, PipelineContext, RequestInput};
use crate::core::store::{SessionHandle, SessionStore};
use crate::core::stream::{EventSender, EventStream, request_channel};

/// Snapshot returned by `join_session`.
#[derive(Debug, Clone, Serialize)]
pub struct JoinInfo {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub config: Config,
}

/// The engine facade exposed to the transport layer.
///
/// Cheap to share: clone the `Arc` it usually lives in. All methods are
/// callable concurrently; per-session exclusivity is enforced internally.
pub struct SessionEngine {
    store: SessionStore,
    gate: Arc<PermissionGate>,
    pipeline: Arc<dyn Pipeline>,
    config: Config,
}

impl SessionEngine {
    pub fn new(config: Config, pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            store: SessionStore::new(),
            gate: Arc::new(PermissionGate::new()),
            pipeline,
            config,
        }
    }

    /// Resolves (or creates) a session and returns its snapshot.
    pub fn join_session(&self, id: Option<&str>) -> JoinInfo {
        let session = self.store.get_or_create(id);
        JoinInfo {
            session_id: session.id().to_string(),
            message_count: session.message_count(),
            created_at: session.created_at(),
            config: self.config.clone(),
        }
    }

    /// Admits a chat message and returns the request's event stream.
    ///
    /// # Errors
    /// `SessionNotFound` for unknown sessions, `RequestConflict` while a
    /// request is already active.
    pub fn send_message(
        &self,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<EventStream, EngineError> {
        self.admit(
            session_id,
            RequestInput::Message {
                text: text.into(),
                image: None,
            },
        )
    }

    /// Admits a chat message with an image attachment.
    ///
    /// # Errors
    /// `SessionNotFound` for unknown sessions, `RequestConflict` while a
    /// request is already active.
    pub fn send_message_with_image(
        &self,
        session_id: &str,
        text: impl Into<String>,
        image: ImageContent,
    ) -> Result<EventStream, EngineError> {
        self.admit(
            session_id,
            RequestInput::Message {
                text: text.into(),
                image: Some(image),
            },
        )
    }

    /// Admits a command. Same state machine and stream contract as
    /// `send_message`; only the admission path differs.
    ///
    /// # Errors
    /// `SessionNotFound` for unknown sessions, `RequestConflict` while a
    /// request is already active.
    pub fn execute_command(
        &self,
        session_id: &str,
        command: impl Into<String>,
    ) -> Result<EventStream, EngineError> {
        self.admit(
            session_id,
            RequestInput::Command {
                text: command.into(),
            },
        )
    }

    /// Cancels the session's active request, if any.
    ///
    /// Returns whether a request was active. Idempotent; cancelling an idle
    /// session is a reported no-op.
    pub fn cancel_request(&self, session_id: &str) -> bool {
        let Some(session) = self.store.get(session_id) else {
            return false;
        };
        let cancelled = session.cancel_active();
        if cancelled {
            // Wake any pipeline suspended on a permission so it can unwind.
            self.gate.invalidate_session(session_id);
        }
        cancelled
    }

    /// Routes a permission response to its suspended pipeline.
    ///
    /// Returns `true` exactly once per request id; unknown, foreign-session,
    /// and already-resolved ids report `false`.
    pub fn respond_to_permission(
        &self,
        session_id: &str,
        request_id: &str,
        choice: PermissionChoice,
    ) -> bool {
        self.gate.resolve(session_id, request_id, choice)
    }

    /// Truncates the session's message log (identity preserved).
    ///
    /// # Errors
    /// `SessionNotFound` for unknown sessions, `RequestConflict` while a
    /// request is active — cancel it first.
    pub fn clear_session(&self, session_id: &str) -> Result<(), EngineError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        session.clear()?;
        self.gate.forget_session_grants(session_id);
        Ok(())
    }

    /// Returns the visible conversation (`user`/`assistant` entries), or
    /// `None` for unknown sessions.
    pub fn get_history(&self, session_id: &str) -> Option<Vec<Message>> {
        self.store.get(session_id).map(|s| s.visible_history())
    }

    /// Lists summaries, most-recently-active first.
    pub fn get_recent_sessions(&self, limit: Option<usize>) -> Vec<SessionSummary> {
        self.store
            .list_recent(limit.unwrap_or(self.config.recent_sessions_limit))
    }

    /// Current configuration snapshot.
    pub fn get_config(&self) -> &Config {
        &self.config
    }

    /// Admission: acquires the session's request slot, appends the user
    /// entry, and spawns the pipeline behind its event stream.
    fn admit(
        &self,
        session_id: &str,
        input: RequestInput,
    ) -> Result<EventStream, EngineError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let token = session.admit()?;

        // Log reflects user intent even if the request later fails.
        let user_message = match &input {
            RequestInput::Message {
                text,
                image: Some(image),
            } => Message::user_with_image(text.clone(), image.clone()),
            RequestInput::Message { text, image: None } | RequestInput::Command { text } => {
                Message::user(text.clone())
            }
        };
        session.append(user_message);

        let (sender, stream) = request_channel(self.config.event_buffer);
        let ctx = PipelineContext::new(
            session.id().to_string(),
            input,
            session.messages(),
            sender.clone(),
            token.clone(),
            Arc::clone(&self.gate),
            self.config.permission_timeout(),
        );

        let pipeline = Arc::clone(&self.pipeline);
        let gate = Arc::clone(&self.gate);
        tokio::spawn(async move {
            let run = tokio::spawn(async move { pipeline.run(ctx).await });
            let result = match run.await {
                Ok(result) => result,
                Err(join_err) => Err(anyhow!("pipeline task failed: {join_err}")),
            };
            finish_request(&session, &gate, &sender, token.is_cancelled(), result).await;
        });

        Ok(stream)
    }
}

/// Converts the pipeline outcome into exactly one terminal event and runs
/// the boundary cleanup, in order: persist assistant text, invalidate
/// pending permissions, release the handle, deliver the terminal event.
/// The handle is released first so that observing the terminal event
/// guarantees the session is admittable again. Cleanup runs even when the
/// consumer already disconnected.
async fn finish_request(
    session: &SessionHandle,
    gate: &PermissionGate,
    sender: &EventSender,
    cancelled: bool,
    result: anyhow::Result<()>,
) {
    let partial = sender.transcript();
    let terminal = match result {
        Ok(()) if !cancelled => StreamEvent::Completed {
            final_text: partial.clone(),
        },
        Ok(()) => StreamEvent::Cancelled {
            partial_content: (!partial.is_empty()).then(|| partial.clone()),
        },
        Err(err) if err.is::<RequestCancelled>() => StreamEvent::Cancelled {
            partial_content: (!partial.is_empty()).then(|| partial.clone()),
        },
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "pipeline failed");
            StreamEvent::Error {
                message: err.to_string(),
                details: None,
            }
        }
    };

    if !partial.is_empty() {
        session.append(Message::assistant(partial));
    }

    gate.invalidate_session(session.id());
    session.release();

    if !sender.send(terminal).await {
        debug!(session_id = %session.id(), "consumer gone before terminal event");
    }
}
