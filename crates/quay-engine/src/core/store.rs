//! In-memory session registry and message logs.
//!
//! The store owns all session state. Each session's log is append-only and
//! mutated only by the orchestrator at defined boundaries (admission and
//! terminal). The registry map is the only resource shared across sessions;
//! its own mutex resolves duplicate-create races to a single winner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use quay_types::{Message, Role, SessionSummary};

use crate::core::cancel::ActiveRequest;
use crate::core::error::EngineError;

/// Maximum length of a derived session title, in characters.
const TITLE_MAX_CHARS: usize = 64;

/// Registry of all live sessions, keyed by id.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating a fresh one when the id is
    /// absent or unknown. Unknown ids are never adopted; the fresh session
    /// gets a newly minted id. Never resets existing state.
    pub fn get_or_create(&self, id: Option<&str>) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = id
            && let Some(session) = sessions.get(id)
        {
            return Arc::clone(session);
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(SessionHandle::new(id.clone()));
        sessions.insert(id.clone(), Arc::clone(&session));
        debug!(session_id = %id, "session created");
        session
    }

    /// Non-creating lookup.
    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Lists summaries, most-recently-active first, bounded to `limit`.
    pub fn list_recent(&self, limit: usize) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<(DateTime<Utc>, SessionSummary)> = sessions
            .values()
            .map(|s| (s.last_active_at(), s.summary()))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries
            .into_iter()
            .take(limit)
            .map(|(_, summary)| summary)
            .collect()
    }
}

/// One session's durable state: identity, message log, active request.
pub struct SessionHandle {
    id: String,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

struct SessionState {
    messages: Vec<Message>,
    active: Option<ActiveRequest>,
    last_active_at: DateTime<Utc>,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            state: Mutex::new(SessionState {
                messages: Vec::new(),
                active: None,
                last_active_at: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits a new request, binding it to a fresh cancellation token.
    ///
    /// # Errors
    /// Returns `RequestConflict` while another request is live.
    pub fn admit(&self) -> Result<CancellationToken, EngineError> {
        let mut state = self.lock();
        if state.active.is_some() {
            return Err(EngineError::RequestConflict(self.id.clone()));
        }
        let active = ActiveRequest::new();
        let token = active.token();
        state.active = Some(active);
        state.last_active_at = Utc::now();
        debug!(session_id = %self.id, "request admitted");
        Ok(token)
    }

    /// Releases the active request handle after a terminal event.
    pub fn release(&self) {
        let mut state = self.lock();
        state.active = None;
        state.last_active_at = Utc::now();
        debug!(session_id = %self.id, "request released");
    }

    /// Cancels the active request, if any. Returns whether one was active.
    pub fn cancel_active(&self) -> bool {
        let state = self.lock();
        match &state.active {
            Some(active) => {
                active.cancel();
                debug!(session_id = %self.id, "request cancelled");
                true
            }
            None => false,
        }
    }

    pub fn has_active_request(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Appends a message to the log.
    pub fn append(&self, message: Message) {
        self.lock().messages.push(message);
    }

    /// Returns a snapshot of the full log, internal roles included.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Returns the conversation visible to callers (`user` and `assistant`
    /// entries only).
    pub fn visible_history(&self) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.role.is_visible())
            .cloned()
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Truncates the message log, preserving identity and creation time.
    ///
    /// # Errors
    /// Returns `RequestConflict` while a request is active; overlapping
    /// clear + stream is rejected rather than left undefined.
    pub fn clear(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.active.is_some() {
            return Err(EngineError::RequestConflict(self.id.clone()));
        }
        state.messages.clear();
        Ok(())
    }

    fn last_active_at(&self) -> DateTime<Utc> {
        self.lock().last_active_at
    }

    /// Builds the read-only summary view.
    pub fn summary(&self) -> SessionSummary {
        let state = self.lock();
        let title = state
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| derive_title(&m.text));
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            message_count: state.messages.len(),
            title,
        }
    }
}

/// Derives a short title from message text: first non-empty line, whitespace
/// collapsed, truncated on a character boundary.
fn derive_title(text: &str) -> Option<String> {
    let line = text.lines().find(|l| !l.trim().is_empty())?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(TITLE_MAX_CHARS).collect())
}
