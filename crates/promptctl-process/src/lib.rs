//! # promptctl-process
//!
//! Process supervision for promptctl.
//!
//! This crate provides:
//! - The [`ProcessSupervisor`] and [`ProcessLauncher`] capability traits
//! - A single-producer/single-consumer byte stream fed by an output pump thread
//! - A liveness flag that flips exactly once, and a cross-thread [`KillSwitch`]
//! - Pipe ([`PipeProcess`]) and pseudo-terminal ([`PtyProcess`]) backends
//! - An in-memory scripted backend for tests ([`testing`])
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on promptctl-core
//! and owns the external process's lifetime and raw I/O streams.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod liveness;
pub mod pipe;
pub mod pty;
pub mod stream;
pub mod supervisor;
pub mod testing;

// Re-export commonly used types
pub use liveness::{KillSwitch, Liveness};
pub use pipe::{PipeLauncher, PipeProcess};
pub use pty::{PtyLauncher, PtyProcess};
pub use stream::{spawn_pump, ByteSource, ByteStream, ReadOutcome};
pub use supervisor::{
    launcher_for, LaunchSpec, ProcessLauncher, ProcessSupervisor, TERMINATE_GRACE,
};
