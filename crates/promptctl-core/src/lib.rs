//! # promptctl-core
//!
//! Core types for promptctl.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other promptctl crates. It provides:
//!
//! - Action types, the action dispatch table and command formatting
//! - Session types (SessionId, SessionState, ExitStatus)
//! - Session file configuration
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other promptctl crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod config;
pub mod error;
pub mod geometry;
pub mod session;

// Re-export commonly used types
pub use action::{Action, ActionSpec, ActionTable, CommandFormatter, DefaultFormatter};
pub use config::{
    ActionConfig, AliasConfig, BackendKind, DrainMode, ProcessSettings, PromptSettings,
    SessionFile, SessionSettings,
};
pub use error::{Error, Result};
pub use geometry::Dimensions;
pub use session::{ExitStatus, SessionId, SessionState};
