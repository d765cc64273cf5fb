//! PTY (Pseudo-Terminal) backend with portable-pty.
//!
//! Some programs only print their prompt, or only flush output, when attached
//! to a terminal. Under a PTY the input is echoed back and output lines end
//! in `\r\n`.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, error, info, warn};

use promptctl_core::{Error, ExitStatus, Result};

use crate::liveness::{KillSwitch, Liveness};
use crate::stream::{spawn_pump, ByteSource, ByteStream, ReadOutcome};
use crate::supervisor::{LaunchSpec, ProcessLauncher, ProcessSupervisor, TERMINATE_GRACE};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Launches processes attached to a pseudo-terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtyLauncher;

impl PtyLauncher {
    /// Create a PTY launcher.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for PtyLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessSupervisor>> {
        Ok(Box::new(PtyProcess::spawn(spec)?))
    }
}

/// Handle to a process spawned in a PTY.
pub struct PtyProcess {
    program: String,
    /// The master PTY end, held open for the life of the session
    _master: Box<dyn MasterPty + Send>,
    /// The child process
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    /// PTY writer
    writer: Box<dyn Write + Send>,
    /// Output fed by the pump thread
    output: ByteStream,
    kill_switch: KillSwitch,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("program", &self.program)
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Spawn a new PTY with the given launch spec.
    ///
    /// # Example
    /// ```no_run
    /// use promptctl_process::{LaunchSpec, PtyProcess};
    /// use promptctl_core::Dimensions;
    ///
    /// # fn example() -> promptctl_core::Result<()> {
    /// let spec = LaunchSpec::new("gdb", vec![]).with_dimensions(Dimensions::new(24, 80));
    /// let pty = PtyProcess::spawn(&spec)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(spec: &LaunchSpec) -> Result<Self> {
        let dimensions = spec.dimensions;
        info!(
            "Spawning PTY: program='{}' args={:?}, dimensions={}x{}, cwd={:?}",
            spec.program, spec.args, dimensions.rows, dimensions.cols, spec.cwd
        );

        let pty_system = native_pty_system();

        // Create PTY with specified dimensions
        let pty_size = PtySize {
            rows: dimensions.rows,
            cols: dimensions.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        debug!("Opening PTY with native system");
        let pair = pty_system.openpty(pty_size).map_err(|e| {
            error!("Failed to open PTY: {}", e);
            Error::launch(&spec.program, format!("failed to open PTY: {e}"))
        })?;

        // Build command
        let mut cmd = CommandBuilder::new(&spec.program);
        for arg in &spec.args {
            cmd.arg(arg);
        }
        if let Some(dir) = &spec.cwd {
            debug!("Setting working directory to: {}", dir);
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", spec.program, e);
            Error::launch(&spec.program, e)
        })?;
        // Close our copy of the slave so EOF is seen once the child exits
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| {
            error!("Failed to take PTY writer: {}", e);
            Error::launch(&spec.program, format!("failed to take writer: {e}"))
        })?;

        let reader = pair.master.try_clone_reader().map_err(|e| {
            error!("Failed to clone PTY reader: {}", e);
            Error::launch(&spec.program, format!("failed to clone reader: {e}"))
        })?;

        let pid = child.process_id();
        let (tx, output) = ByteStream::channel();
        spawn_pump(&format!("pty-{}", pid.unwrap_or_default()), reader, tx)?;

        let killer = Mutex::new(child.clone_killer());
        let kill_switch = KillSwitch::new(Liveness::new(), move || {
            killer
                .lock()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
                .kill()
        });

        info!("PTY spawned successfully: program='{}', pid={:?}", spec.program, pid);

        Ok(Self {
            program: spec.program.clone(),
            _master: pair.master,
            child: Arc::new(Mutex::new(child)),
            writer,
            output,
            kill_switch,
            exit_status: None,
        })
    }

    /// Kill the child through its handle; escalates to SIGKILL on unix.
    fn hard_kill(&mut self) {
        match self.child.lock() {
            Ok(mut child) => {
                if let Err(e) = child.kill() {
                    debug!("Hard kill of PTY process '{}': {}", self.program, e);
                }
            }
            Err(e) => error!("Child lock error: {}", e),
        }
    }
}

impl ByteSource for PtyProcess {
    fn read_byte(&mut self, timeout: Option<Duration>) -> ReadOutcome {
        let outcome = self.output.read_byte(timeout);
        if outcome == ReadOutcome::Pending {
            // Background jobs can keep the slave open after the child exits
            if let Err(e) = self.try_reap() {
                warn!("Failed to poll PTY process '{}': {}", self.program, e);
            }
        }
        outcome
    }

    fn is_alive(&self) -> bool {
        self.kill_switch.is_alive()
    }
}

impl ProcessSupervisor for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.child.lock().ok().and_then(|child| child.process_id())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.kill_switch.is_alive() {
            return Err(Error::Execution(format!(
                "cannot write {} bytes to '{}'",
                bytes.len(),
                self.program
            )));
        }

        debug!("Writing {} bytes to PTY", bytes.len());
        self.writer.write_all(bytes).map_err(Error::Io)?;
        self.writer.flush().map_err(Error::Io)?;

        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        if self.kill_switch.kill() {
            info!("Killed PTY process '{}'", self.program);
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        let started = Instant::now();
        let mut escalated = false;
        loop {
            if let Some(status) = self.try_reap()? {
                return Ok(status);
            }
            if !escalated
                && !self.kill_switch.is_alive()
                && started.elapsed() >= TERMINATE_GRACE
            {
                warn!(
                    "PTY process '{}' survived SIGHUP for {:?}, killing",
                    self.program, TERMINATE_GRACE
                );
                self.hard_kill();
                escalated = true;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    fn try_reap(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }

        let status = self
            .child
            .lock()
            .map_err(|e| Error::Other(format!("Child lock error: {e}")))?
            .try_wait()?;

        if let Some(status) = status {
            let status = ExitStatus::with_code(status.exit_code() as i32);
            info!("PTY process '{}' exited: {}", self.program, status);
            self.kill_switch.liveness().mark_dead();
            self.exit_status = Some(status);
        }
        Ok(self.exit_status)
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    fn kill_switch(&self) -> KillSwitch {
        self.kill_switch.clone()
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            self.kill_switch.kill();
            if let Ok(mut child) = self.child.lock() {
                let _ = child.wait();
            }
        }
    }
}
