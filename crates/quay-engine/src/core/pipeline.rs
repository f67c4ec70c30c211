//! Boundary to the LLM/tool collaborator.
//!
//! The engine does not know how event content is produced. A `Pipeline`
//! implementation drives the model and tools and reports progress through its
//! `PipelineContext`: typed event emission, cooperative cancellation
//! checkpoints, and the permission suspend/resume handshake. Pipelines never
//! emit terminal events; the orchestrator does that at the boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quay_types::{ImageContent, Message, PermissionChoice};

use crate::core::cancel::RequestCancelled;
use crate::core::events::StreamEvent;
use crate::core::permission::PermissionGate;
use crate::core::stream::EventSender;

/// What admitted this request.
#[derive(Debug, Clone)]
pub enum RequestInput {
    /// A chat message, optionally with an image attachment.
    Message {
        text: String,
        image: Option<ImageContent>,
    },
    /// A command; same event-stream contract, alternate admission path.
    Command { text: String },
}

impl RequestInput {
    pub fn text(&self) -> &str {
        match self {
            RequestInput::Message { text, .. } | RequestInput::Command { text } => text,
        }
    }
}

/// Produces the event content for one request.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Runs one request to completion.
    ///
    /// Returning `Ok(())` yields a `Completed` terminal event; a
    /// `RequestCancelled` error yields `Cancelled`; any other error yields
    /// `Error`.
    ///
    /// # Errors
    /// Returns an error if the request was cancelled or the pipeline failed.
    async fn run(&self, ctx: PipelineContext) -> anyhow::Result<()>;
}

/// Everything a pipeline needs while serving one request.
pub struct PipelineContext {
    session_id: String,
    input: RequestInput,
    /// Log snapshot taken at admission, including the new user entry.
    messages: Vec<Message>,
    sender: EventSender,
    token: CancellationToken,
    gate: Arc<PermissionGate>,
    permission_timeout: Option<Duration>,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: String,
        input: RequestInput,
        messages: Vec<Message>,
        sender: EventSender,
        token: CancellationToken,
        gate: Arc<PermissionGate>,
        permission_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session_id,
            input,
            messages,
            sender,
            token,
            gate,
            permission_timeout,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn input(&self) -> &RequestInput {
        &self.input
    }

    /// The session's message log as of admission.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cooperative cancellation checkpoint; call at safe boundaries.
    ///
    /// # Errors
    /// Returns `RequestCancelled` once the request's signal is set.
    pub fn checkpoint(&self) -> Result<(), RequestCancelled> {
        if self.token.is_cancelled() {
            return Err(RequestCancelled);
        }
        Ok(())
    }

    /// Emits an incremental assistant text chunk.
    ///
    /// # Errors
    /// Returns `RequestCancelled` if the request is cancelled before or while
    /// the event is queued.
    pub async fn emit_text(&self, text: impl Into<String>) -> Result<(), RequestCancelled> {
        self.emit(StreamEvent::TextDelta { text: text.into() }).await
    }

    /// Emits a tool-call start event.
    ///
    /// # Errors
    /// Returns `RequestCancelled` if the request is cancelled first.
    pub async fn emit_tool_started(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> Result<(), RequestCancelled> {
        self.emit(StreamEvent::ToolCallStarted {
            id: id.into(),
            name: name.into(),
            input,
        })
        .await
    }

    /// Emits a tool-call result event.
    ///
    /// # Errors
    /// Returns `RequestCancelled` if the request is cancelled first.
    pub async fn emit_tool_result(
        &self,
        id: impl Into<String>,
        output: Value,
        ok: bool,
    ) -> Result<(), RequestCancelled> {
        self.emit(StreamEvent::ToolCallResult {
            id: id.into(),
            output,
            ok,
        })
        .await
    }

    /// Asks the human for approval, suspending this pipeline until resolved.
    ///
    /// Remembered `Always`/`Session` grants for an identical prompt resolve
    /// immediately without emitting an event. Otherwise a
    /// `PermissionRequested` event is emitted and the pipeline parks until
    /// `resolve` wakes it. A configured timeout expires to an implicit `No`.
    ///
    /// # Errors
    /// Returns `RequestCancelled` if the request is cancelled while waiting.
    pub async fn request_permission(
        &self,
        prompt: &str,
    ) -> Result<PermissionChoice, RequestCancelled> {
        self.checkpoint()?;

        if let Some(choice) = self.gate.remembered(&self.session_id, prompt) {
            debug!(session_id = %self.session_id, ?choice, "permission auto-resolved");
            return Ok(choice);
        }

        let (request_id, rx) = self.gate.register(&self.session_id, prompt);
        self.emit(StreamEvent::PermissionRequested {
            request_id: request_id.clone(),
            prompt: prompt.to_string(),
            choices: PermissionChoice::ALL.to_vec(),
        })
        .await
        .inspect_err(|_| self.gate.discard(&request_id))?;

        let outcome = tokio::select! {
            biased;
            () = self.token.cancelled() => {
                self.gate.discard(&request_id);
                return Err(RequestCancelled);
            }
            choice = self.await_resolution(rx) => choice,
        };

        match outcome {
            Some(choice) => Ok(choice),
            // Timed out: the registration is stale, expire to an implicit No.
            None => {
                self.gate.discard(&request_id);
                Ok(PermissionChoice::No)
            }
        }
    }

    async fn await_resolution(
        &self,
        rx: tokio::sync::oneshot::Receiver<PermissionChoice>,
    ) -> Option<PermissionChoice> {
        match self.permission_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .ok()
                .map(|res| res.unwrap_or(PermissionChoice::No)),
            None => Some(rx.await.unwrap_or(PermissionChoice::No)),
        }
    }

    /// Queues an event, racing the request's cancellation signal so a
    /// blocked producer still unwinds promptly.
    async fn emit(&self, event: StreamEvent) -> Result<(), RequestCancelled> {
        self.checkpoint()?;
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(RequestCancelled),
            _ = self.sender.send(event) => Ok(()),
        }
    }
}
