//! Runs one session as described by a session file.

use std::io::{BufReader, Stdin, Stdout};
use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};

use promptctl_core::{ExitStatus, SessionFile};
use promptctl_process::launcher_for;
use promptctl_session::{
    AsyncSession, EndReason, OutputSink, SessionController, TeeSink, Transcript, WriterSink,
};

/// Exit code used when the session was cancelled (Ctrl-C).
pub const CANCELLED_EXIT_CODE: i32 = 130;

type CliSink = TeeSink<Option<WriterSink<Stdout>>, Option<Transcript>>;

/// What happened to the controlled process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Exit status of the process, when it was reaped
    pub exit_status: Option<ExitStatus>,
    /// Why the session ended
    pub end_reason: Option<EndReason>,
    /// Code this binary should exit with
    pub exit_code: i32,
}

/// Exit code mirroring the controlled process.
///
/// A process that exits on its own passes its code through. A process the
/// session stopped on purpose (queue finished, `kill` action) counts as a
/// success; a cancelled session exits with 130.
pub fn exit_code(status: Option<ExitStatus>, reason: Option<EndReason>) -> i32 {
    match reason {
        Some(EndReason::Cancelled) => CANCELLED_EXIT_CODE,
        Some(EndReason::Terminated) => 0,
        _ => status.and_then(|s| s.code).unwrap_or(1),
    }
}

/// Run the session described by `config` until it ends or Ctrl-C is pressed.
///
/// Output is echoed to stdout unless disabled in the config. With `record`,
/// an asciinema transcript is written once the session is over.
pub async fn run_session(config: SessionFile, record: Option<PathBuf>) -> anyhow::Result<RunSummary> {
    let launcher = launcher_for(config.process.backend);
    let controller = SessionController::from_config(launcher, &config)
        .context("Invalid session configuration")?;

    let echo = config
        .session
        .echo_output
        .then(|| WriterSink::new(std::io::stdout()));
    let transcript = record.as_ref().map(|_| {
        let command = std::iter::once(config.process.program.as_str())
            .chain(config.process.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Transcript::new(config.process.dimensions).with_command(command)
    });
    let sink: CliSink = TeeSink::new(echo, transcript);
    let controller = controller.with_sink(sink);

    let input: Option<BufReader<Stdin>> = config
        .session
        .interactive
        .then(|| BufReader::new(std::io::stdin()));

    info!(
        "Running '{}' ({} queued actions, interactive={})",
        config.process.program,
        controller.queue().len(),
        config.session.interactive
    );

    let session = AsyncSession::spawn(controller, input);
    let canceller = session.canceller();
    let join = session.join(None);
    tokio::pin!(join);

    let joined = tokio::select! {
        finished = &mut join => Some(finished),
        _ = tokio::signal::ctrl_c() => None,
    };
    let finished = match joined {
        Some(finished) => finished,
        None => {
            warn!("Interrupted, cancelling session");
            canceller.cancel();
            join.await
        }
    }
    .context("Session task failed")?;

    let status = finished.result.context("Session failed")?;
    let end_reason = finished.controller.end_reason();

    let mut sink = finished.controller.into_sink();
    sink.flush();
    if let (Some(path), Some(transcript)) = (record, sink.second.as_mut()) {
        transcript
            .save_to_file(&path)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
    }

    let summary = RunSummary {
        exit_status: Some(status),
        end_reason,
        exit_code: exit_code(Some(status), end_reason),
    };
    info!(
        "Session finished: {} ({:?}), exit code {}",
        status, end_reason, summary.exit_code
    );
    Ok(summary)
}
