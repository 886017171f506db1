//! Resilient orchestration for AI-assisted architecture analysis.
//!
//! A session walks a fixed sequence of steps, from intake through export. Every call to an
//! external collaborator (LLM, diagram tool, document serializer) is classified as
//! transient, permanent or degraded, retried with backoff where that helps, and recorded
//! in a per-session state that is persisted after every step.

pub mod config;
pub mod diagrams;
pub mod failure;
pub mod llm;
pub mod mcp;
pub mod paths;
pub mod phases;
pub mod report;
pub mod retry;
pub mod session;
pub mod session_store;
pub mod state;
pub mod state_machine;
pub mod structured_logger;

/// Version string shown by `--version`.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("ARCHFLOW_GIT_SHA"), ")");
