//! Running a blocking session from async code.
//!
//! The controller blocks on process output, so it runs on tokio's blocking
//! pool. A deadline fires the session's canceller, which makes the blocked
//! prompt wait return and lets the task finish instead of leaking a thread.

use std::io::BufRead;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use promptctl_core::{Error, ExitStatus, Result};
use promptctl_process::ProcessLauncher;

use crate::controller::{SessionCanceller, SessionController};
use crate::sink::OutputSink;

/// A finished background session.
#[derive(Debug)]
pub struct Finished<L, S> {
    /// The controller, for its sink, state and end reason
    pub controller: SessionController<L, S>,
    /// What `run` returned
    pub result: Result<ExitStatus>,
    /// The deadline passed and the session was cancelled
    pub deadline_hit: bool,
}

/// A session running on the blocking thread pool.
#[derive(Debug)]
pub struct AsyncSession<L, S> {
    handle: JoinHandle<(SessionController<L, S>, Result<ExitStatus>)>,
    canceller: SessionCanceller,
}

impl<L, S> AsyncSession<L, S>
where
    L: ProcessLauncher + Send + 'static,
    S: OutputSink + 'static,
{
    /// Run `controller` to completion in the background.
    ///
    /// `input`, when given, is handed to the process after the queue drains.
    pub fn spawn<R>(mut controller: SessionController<L, S>, input: Option<R>) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let canceller = controller.canceller();
        info!("Spawning session {} on the blocking pool", controller.id());

        let handle = tokio::task::spawn_blocking(move || {
            let result = controller.run(input);
            (controller, result)
        });

        Self { handle, canceller }
    }

    /// Handle for cancelling the session.
    pub fn canceller(&self) -> SessionCanceller {
        self.canceller.clone()
    }

    /// Cancel the session; `join` still has to be awaited.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the session, cancelling it once `deadline` passes.
    ///
    /// Fails only if the background task panicked.
    pub async fn join(mut self, deadline: Option<Duration>) -> Result<Finished<L, S>> {
        let mut deadline_hit = false;

        let joined = match deadline {
            Some(limit) => match tokio::time::timeout(limit, &mut self.handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Session deadline of {:?} passed, cancelling", limit);
                    deadline_hit = true;
                    self.canceller.cancel();
                    self.handle.await
                }
            },
            None => self.handle.await,
        };

        let (controller, result) =
            joined.map_err(|e| Error::Other(format!("Session task failed: {e}")))?;

        Ok(Finished {
            controller,
            result,
            deadline_hit,
        })
    }
}
