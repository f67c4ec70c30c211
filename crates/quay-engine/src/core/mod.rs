//! Core module: transport-agnostic session orchestration.
//!
//! This module contains:
//! - `events`: Stream event types emitted during a request
//! - `error`: Engine error taxonomy
//! - `stream`: Bounded per-request event channels
//! - `cancel`: Per-request cooperative cancellation
//! - `store`: In-memory session registry and message logs
//! - `permission`: Suspend/resume gate for human approval
//! - `pipeline`: The boundary trait to the LLM/tool collaborator
//! - `engine`: The session orchestrator tying it all together

pub mod cancel;
pub mod engine;
pub mod error;
pub mod events;
pub mod permission;
pub mod pipeline;
pub mod store;
pub mod stream;
