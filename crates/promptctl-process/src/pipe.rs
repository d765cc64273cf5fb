//! Pipe backend: the process talks over plain stdin/stdout pipes.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use promptctl_core::{Error, ExitStatus, Result};

use crate::liveness::{KillSwitch, Liveness};
use crate::stream::{spawn_pump, ByteSource, ByteStream, ReadOutcome};
use crate::supervisor::{LaunchSpec, ProcessLauncher, ProcessSupervisor, TERMINATE_GRACE};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Launches processes connected through pipes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeLauncher;

impl PipeLauncher {
    /// Create a pipe launcher.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for PipeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessSupervisor>> {
        Ok(Box::new(PipeProcess::spawn(spec)?))
    }
}

/// A process whose stdin/stdout are pipes owned by the controller.
pub struct PipeProcess {
    program: String,
    pid: u32,
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    output: ByteStream,
    kill_switch: KillSwitch,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for PipeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl PipeProcess {
    /// Spawn a process with piped stdin/stdout.
    ///
    /// # Example
    /// ```no_run
    /// use promptctl_process::{LaunchSpec, PipeProcess};
    ///
    /// # fn example() -> promptctl_core::Result<()> {
    /// let process = PipeProcess::spawn(&LaunchSpec::new("gdb", vec!["-q".to_string()]))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(spec: &LaunchSpec) -> Result<Self> {
        info!(
            "Spawning piped process: program='{}' args={:?}, cwd={:?}, merge_stderr={}",
            spec.program, spec.args, spec.cwd, spec.merge_stderr
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if spec.merge_stderr {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });

        if let Some(dir) = &spec.cwd {
            debug!("Setting working directory to: {}", dir);
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn '{}': {}", spec.program, e);
            Error::launch(&spec.program, e)
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::launch(&spec.program, "stdout was not captured"))?;

        let (tx, output) = ByteStream::channel();
        if let Some(stderr) = child.stderr.take() {
            spawn_pump(&format!("{pid}-stderr"), stderr, tx.clone())?;
        }
        spawn_pump(&format!("{pid}-stdout"), stdout, tx)?;

        let child = Arc::new(Mutex::new(child));
        let kill_switch = KillSwitch::new(Liveness::new(), Self::signal_fn(pid, &child));

        info!("Piped process spawned: program='{}', pid={}", spec.program, pid);

        Ok(Self {
            program: spec.program.clone(),
            pid,
            child,
            stdin,
            output,
            kill_switch,
            exit_status: None,
        })
    }

    /// Ask the process to exit with SIGTERM.
    #[cfg(unix)]
    fn signal_fn(
        pid: u32,
        _child: &Arc<Mutex<Child>>,
    ) -> impl Fn() -> std::io::Result<()> + Send + Sync + 'static {
        move || {
            debug!("Sending SIGTERM to pid {}", pid);
            let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if rc == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        }
    }

    /// Kill the process through its handle (non-unix implementation).
    #[cfg(not(unix))]
    fn signal_fn(
        _pid: u32,
        child: &Arc<Mutex<Child>>,
    ) -> impl Fn() -> std::io::Result<()> + Send + Sync + 'static {
        let child = Arc::clone(child);
        move || {
            child
                .lock()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?
                .kill()
        }
    }

    /// Kill the process outright (SIGKILL on unix).
    fn hard_kill(&mut self) {
        match self.child.lock() {
            Ok(mut child) => {
                if let Err(e) = child.kill() {
                    debug!("Hard kill of pid {}: {}", self.pid, e);
                }
            }
            Err(e) => error!("Child lock error: {}", e),
        }
    }
}

impl ByteSource for PipeProcess {
    fn read_byte(&mut self, timeout: Option<Duration>) -> ReadOutcome {
        let outcome = self.output.read_byte(timeout);
        if outcome == ReadOutcome::Pending {
            // A grandchild may hold stdout open after the child exits
            if let Err(e) = self.try_reap() {
                warn!("Failed to poll pid {}: {}", self.pid, e);
            }
        }
        outcome
    }

    fn is_alive(&self) -> bool {
        self.kill_switch.is_alive()
    }
}

impl ProcessSupervisor for PipeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.kill_switch.is_alive() {
            return Err(Error::Execution(format!(
                "cannot write {} bytes to '{}'",
                bytes.len(),
                self.program
            )));
        }

        debug!("Writing {} bytes to pid {}", bytes.len(), self.pid);
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Execution(format!("stdin of '{}' is closed", self.program)))?;

        stdin
            .write_all(bytes)
            .and_then(|_| stdin.flush())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::BrokenPipe => {
                    Error::Execution(format!("'{}' closed its input", self.program))
                }
                _ => Error::Io(e),
            })
    }

    fn terminate(&mut self) -> Result<()> {
        if self.kill_switch.kill() {
            info!("Terminated process: program='{}', pid={}", self.program, self.pid);
        }
        self.stdin = None;
        Ok(())
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        let started = Instant::now();
        let mut escalated = false;
        loop {
            if let Some(status) = self.try_reap()? {
                return Ok(status);
            }
            // Dead but unreaped: terminate was requested and ignored
            if !escalated
                && !self.kill_switch.is_alive()
                && started.elapsed() >= TERMINATE_GRACE
            {
                warn!(
                    "pid {} still running {:?} after SIGTERM, killing",
                    self.pid, TERMINATE_GRACE
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
            let status = ExitStatus::from(status);
            info!("Process {} exited: {}", self.pid, status);
            self.kill_switch.liveness().mark_dead();
            self.stdin = None;
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

impl Drop for PipeProcess {
    fn drop(&mut self) {
        if self.exit_status.is_some() {
            return;
        }

        self.kill_switch.kill();
        if let Ok(mut child) = self.child.lock() {
            if let Err(e) = child.kill() {
                debug!("Kill on drop for pid {}: {}", self.pid, e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap pid {}: {}", self.pid, e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn read_all(process: &mut PipeProcess) -> Vec<u8> {
        let mut out = Vec::new();
        while let ReadOutcome::Byte(b) = process.read_byte(None) {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_spawn_and_read() {
        let mut process = PipeProcess::spawn(&sh("printf 'hello\\n'")).unwrap();
        assert!(process.is_alive());
        assert!(process.pid().is_some());

        assert_eq!(read_all(&mut process), b"hello\n");
        assert!(process.wait().unwrap().success());
        assert!(!process.is_alive());
    }

    #[test]
    fn test_spawn_missing_program() {
        let result = PipeProcess::spawn(&LaunchSpec::new("/nonexistent/promptctl-test", vec![]));
        assert!(matches!(result, Err(Error::Launch { .. })));
    }

    #[test]
    fn test_write_and_read_back() {
        let mut process = PipeProcess::spawn(&LaunchSpec::new("cat", vec![])).unwrap();
        process.write(b"ping\n").unwrap();

        let mut line = Vec::new();
        while let ReadOutcome::Byte(b) = process.read_byte(None) {
            line.push(b);
            if b == b'\n' {
                break;
            }
        }
        assert_eq!(line, b"ping\n");
        process.terminate().unwrap();
    }

    #[test]
    fn test_exit_code() {
        let mut process = PipeProcess::spawn(&sh("exit 3")).unwrap();
        let status = process.wait().unwrap();
        assert_eq!(status.code, Some(3));
        assert_eq!(process.exit_status(), Some(status));
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut process = PipeProcess::spawn(&LaunchSpec::new("cat", vec![])).unwrap();
        process.terminate().unwrap();
        process.terminate().unwrap();
        assert!(!process.is_alive());

        let status = process.wait().unwrap();
        assert!(!status.success());
        assert_eq!(read_all(&mut process), b"");
    }

    #[test]
    fn test_write_after_terminate_fails() {
        let mut process = PipeProcess::spawn(&LaunchSpec::new("cat", vec![])).unwrap();
        process.terminate().unwrap();

        let result = process.write(b"late\n");
        assert!(matches!(result, Err(Error::Execution(_))));
    }

    #[test]
    fn test_kill_switch_from_other_thread() {
        let mut process = PipeProcess::spawn(&LaunchSpec::new("cat", vec![])).unwrap();
        let switch = process.kill_switch();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            switch.kill();
        });

        assert_eq!(process.read_byte(None), ReadOutcome::EndOfStream);
        assert!(!process.is_alive());
        process.wait().unwrap();
    }

    #[test]
    fn test_exit_noticed_while_grandchild_holds_output() {
        let mut process = PipeProcess::spawn(&sh("(sleep 5 &); exit 0")).unwrap();

        let start = Instant::now();
        while process.is_alive() && start.elapsed() < Duration::from_secs(4) {
            process.read_byte(Some(Duration::from_millis(20)));
        }

        assert!(!process.is_alive());
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(process.try_reap().unwrap().map(|s| s.success()), Some(true));
    }

    #[test]
    fn test_wait_kills_process_ignoring_sigterm() {
        let mut process =
            PipeProcess::spawn(&sh("trap '' TERM; echo ready; while :; do sleep 1; done")).unwrap();
        let mut banner = Vec::new();
        while let ReadOutcome::Byte(b) = process.read_byte(Some(Duration::from_secs(5))) {
            banner.push(b);
            if b == b'\n' {
                break;
            }
        }
        assert_eq!(banner, b"ready\n");

        let start = Instant::now();
        process.terminate().unwrap();
        let status = process.wait().unwrap();

        assert!(!status.success());
        assert!(start.elapsed() >= TERMINATE_GRACE);
        assert!(start.elapsed() < TERMINATE_GRACE + Duration::from_secs(3));
    }

    #[test]
    fn test_merged_stderr() {
        let spec = sh("printf 'err\\n' >&2").with_merged_stderr();
        let mut process = PipeProcess::spawn(&spec).unwrap();
        assert_eq!(read_all(&mut process), b"err\n");
    }

    #[test]
    fn test_env_and_cwd() {
        let spec = sh("printf '%s %s' \"$PROMPTCTL_TEST\" \"$(pwd)\"")
            .with_env("PROMPTCTL_TEST", "yes")
            .with_cwd("/");
        let mut process = PipeProcess::spawn(&spec).unwrap();
        assert_eq!(read_all(&mut process), b"yes /");
    }
}
