//! # promptctl
//!
//! Runs a prompt-based program (debugger, REPL, compiler shell), feeds it a
//! queue of commands one prompt at a time and optionally hands stdin over
//! once the queue is exhausted.
//!
//! ## Architecture
//!
//! This is Layer 3, the binary tying together:
//! - promptctl-core: Actions, configuration, errors
//! - promptctl-process: Pipe and PTY process supervision
//! - promptctl-session: Prompt watching, action queue, session controller

use promptctl::{run_session, session_file_schema, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_env();

    if cli.print_schema {
        println!("{}", serde_json::to_string_pretty(&session_file_schema())?);
        return Ok(());
    }

    let config = cli.to_session_file()?;

    // Logs go to stderr; stdout carries the process output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.session.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("promptctl v{} starting", env!("CARGO_PKG_VERSION"));

    let summary = run_session(config, cli.record.clone()).await?;

    tracing::info!("promptctl exiting with code {}", summary.exit_code);
    std::process::exit(summary.exit_code);
}
