//! # promptctl
//!
//! Command-line front end for driving prompt-based interactive programs.
//! Parses the command line and session file, then runs one session with
//! output echoed to stdout and an optional asciinema transcript.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod runner;

pub use cli::{session_file_schema, Cli};
pub use runner::{exit_code, run_session, RunSummary, CANCELLED_EXIT_CODE};
