//! Suspend/resume gate for human approval.
//!
//! A pipeline that needs approval registers a waiter keyed by a fresh request
//! id and parks on a oneshot receiver; resolution arrives from the transport
//! via `resolve`, exactly once per id. Cancellation of the owning request
//! invalidates pending registrations so suspended pipelines never leak.
//!
//! `Always` and `Session` choices are remembered (process-wide and
//! per-session respectively), keyed by a normalized form of the prompt, and
//! short-circuit future identical prompts without suspending.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use quay_types::PermissionChoice;

/// Registry of outstanding approval requests and remembered grants.
#[derive(Default)]
pub struct PermissionGate {
    inner: Mutex<GateInner>,
}

#[derive(Default)]
struct GateInner {
    pending: HashMap<String, PendingPermission>,
    session_grants: HashMap<String, HashSet<String>>,
    global_grants: HashSet<String>,
}

struct PendingPermission {
    session_id: String,
    prompt_key: String,
    tx: oneshot::Sender<PermissionChoice>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the remembered choice for an identical prompt in scope, if any.
    pub fn remembered(&self, session_id: &str, prompt: &str) -> Option<PermissionChoice> {
        let key = normalize_prompt(prompt);
        let inner = self.lock();
        if inner.global_grants.contains(&key) {
            return Some(PermissionChoice::Always);
        }
        if inner
            .session_grants
            .get(session_id)
            .is_some_and(|grants| grants.contains(&key))
        {
            return Some(PermissionChoice::Session);
        }
        None
    }

    /// Registers a pending approval and returns its id plus the waiter.
    pub fn register(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> (String, oneshot::Receiver<PermissionChoice>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock().pending.insert(
            request_id.clone(),
            PendingPermission {
                session_id: session_id.to_string(),
                prompt_key: normalize_prompt(prompt),
                tx,
            },
        );
        debug!(session_id, request_id, "permission registered");
        (request_id, rx)
    }

    /// Resolves a pending approval. Succeeds exactly once per request id.
    ///
    /// Returns `true` only if the id exists, belongs to `session_id`, and the
    /// waiter was woken with `choice`. Every later call for the same id
    /// returns `false`.
    pub fn resolve(&self, session_id: &str, request_id: &str, choice: PermissionChoice) -> bool {
        let mut inner = self.lock();
        let owned = inner
            .pending
            .get(request_id)
            .is_some_and(|p| p.session_id == session_id);
        if !owned {
            return false;
        }

        // Checked above; remove consumes the single resolution.
        let Some(pending) = inner.pending.remove(request_id) else {
            return false;
        };
        let delivered = pending.tx.send(choice).is_ok();
        if delivered {
            match choice {
                PermissionChoice::Always => {
                    inner.global_grants.insert(pending.prompt_key);
                }
                PermissionChoice::Session => {
                    inner
                        .session_grants
                        .entry(pending.session_id)
                        .or_default()
                        .insert(pending.prompt_key);
                }
                PermissionChoice::Once | PermissionChoice::No => {}
            }
            debug!(session_id, request_id, ?choice, "permission resolved");
        }
        delivered
    }

    /// Invalidates every pending approval owned by `session_id`, waking the
    /// waiters with an implicit `No`. Returns how many were invalidated.
    pub fn invalidate_session(&self, session_id: &str) -> usize {
        let mut inner = self.lock();
        let ids: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, p)| p.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(pending) = inner.pending.remove(id) {
                let _ = pending.tx.send(PermissionChoice::No);
            }
        }
        if !ids.is_empty() {
            debug!(session_id, count = ids.len(), "permissions invalidated");
        }
        ids.len()
    }

    /// Drops a registration without waking anyone. Used when the waiter
    /// itself gave up (cancellation, timeout).
    pub fn discard(&self, request_id: &str) {
        self.lock().pending.remove(request_id);
    }

    /// Forgets session-scoped grants, e.g. when a session's log is cleared.
    pub fn forget_session_grants(&self, session_id: &str) {
        self.lock().session_grants.remove(session_id);
    }
}

/// Normalizes a prompt for grant matching: case-folded, whitespace collapsed.
fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
