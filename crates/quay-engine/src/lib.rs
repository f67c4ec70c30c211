//! Session orchestration and streaming engine for an interactive
//! coding-assistant backend.

pub mod config;
pub mod core;
pub mod logging;
