//! # promptctl-session
//!
//! Session control for promptctl.
//!
//! This crate provides:
//! - Prompt detection over a raw byte stream ([`PromptWatcher`])
//! - The ordered action queue and its drain semantics ([`ActionQueue`])
//! - The session state machine and automated/manual hand-off
//!   ([`SessionController`])
//! - Output sinks and asciinema transcripts
//! - An async wrapper running sessions on tokio's blocking pool
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on promptctl-core
//! and promptctl-process to drive a controlled process's session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod queue;
pub mod runtime;
pub mod sink;
pub mod transcript;
pub mod watcher;

// Re-export commonly used types
pub use controller::{EndReason, InteractReport, SessionCanceller, SessionController};
pub use queue::{ActionQueue, DrainReport};
pub use runtime::{AsyncSession, Finished};
pub use sink::{NullSink, OutputSink, TeeSink, WriterSink};
pub use transcript::{CastEvent, CastHeader, EventKind, Transcript};
pub use watcher::{LineBuffer, PromptPattern, PromptWatcher, DEFAULT_POLL_INTERVAL};
