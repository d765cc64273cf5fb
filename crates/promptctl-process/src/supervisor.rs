//! Capability traits for launching and supervising a controlled process.

use std::time::Duration;

use promptctl_core::{BackendKind, Dimensions, ExitStatus, ProcessSettings, Result};

use crate::liveness::KillSwitch;
use crate::pipe::PipeLauncher;
use crate::pty::PtyLauncher;
use crate::stream::ByteSource;

/// How long `wait` gives a terminated process before killing it outright.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to start a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable path or name resolved through PATH
    pub program: String,
    /// Positional arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Merge stderr into the output stream (pipe backend)
    pub merge_stderr: bool,
    /// Terminal size (PTY backend)
    pub dimensions: Dimensions,
}

impl LaunchSpec {
    /// Launch `program` with `args` and default settings.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: vec![],
            merge_stderr: false,
            dimensions: Dimensions::default(),
        }
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Merge stderr into the watched output.
    pub fn with_merged_stderr(mut self) -> Self {
        self.merge_stderr = true;
        self
    }

    /// Set the PTY dimensions.
    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self
    }
}

impl From<&ProcessSettings> for LaunchSpec {
    fn from(settings: &ProcessSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            cwd: settings.cwd.clone(),
            env: settings.env.clone(),
            merge_stderr: settings.merge_stderr,
            dimensions: settings.dimensions,
        }
    }
}

/// Owner of a running process and its raw I/O streams.
///
/// The output side is exposed through [`ByteSource`]; `is_alive` reports the
/// liveness flag, which flips once on `terminate`, a [`KillSwitch`] kill, or
/// when `wait` or `try_reap` observes the exit. Backends also reap on an idle
/// read, so an exited child is noticed even while a grandchild keeps its
/// output open.
pub trait ProcessSupervisor: ByteSource + Send {
    /// OS process identifier, when known.
    fn pid(&self) -> Option<u32>;

    /// Write bytes to the process input.
    ///
    /// Fails with `Error::Execution` when the process is not alive.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Request process death. Idempotent.
    fn terminate(&mut self) -> Result<()>;

    /// Block until the process has exited and return its status.
    ///
    /// A process that was asked to terminate but is still running after a
    /// grace period is killed outright.
    fn wait(&mut self) -> Result<ExitStatus>;

    /// Non-blocking check for exit; records the status if the process is gone.
    fn try_reap(&mut self) -> Result<Option<ExitStatus>>;

    /// Exit status, once the process has been reaped.
    fn exit_status(&self) -> Option<ExitStatus>;

    /// Handle for killing the process from another thread.
    fn kill_switch(&self) -> KillSwitch;
}

/// Starts processes for a session controller.
pub trait ProcessLauncher {
    /// Launch a process.
    ///
    /// Fails with `Error::Launch` if the executable cannot be found or started.
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessSupervisor>>;
}

impl<L: ProcessLauncher + ?Sized> ProcessLauncher for Box<L> {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessSupervisor>> {
        (**self).launch(spec)
    }
}

/// Launcher for the configured backend.
pub fn launcher_for(kind: BackendKind) -> Box<dyn ProcessLauncher + Send> {
    match kind {
        BackendKind::Pipe => Box::new(PipeLauncher::new()),
        BackendKind::Pty => Box::new(PtyLauncher::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("gdb", vec!["-q".to_string()])
            .with_cwd("/tmp")
            .with_env("TERM", "dumb")
            .with_merged_stderr()
            .with_dimensions(Dimensions::new(40, 100));

        assert_eq!(spec.program, "gdb");
        assert_eq!(spec.args, vec!["-q"]);
        assert_eq!(spec.cwd.as_deref(), Some("/tmp"));
        assert_eq!(spec.env, vec![("TERM".to_string(), "dumb".to_string())]);
        assert!(spec.merge_stderr);
        assert_eq!(spec.dimensions, Dimensions::new(40, 100));
    }

    #[test]
    fn test_launch_spec_from_settings() {
        let settings = ProcessSettings {
            program: "sbcl".to_string(),
            args: vec!["--noinform".to_string()],
            merge_stderr: true,
            ..Default::default()
        };

        let spec = LaunchSpec::from(&settings);
        assert_eq!(spec.program, "sbcl");
        assert_eq!(spec.args, vec!["--noinform"]);
        assert!(spec.merge_stderr);
        assert_eq!(spec.cwd, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_launcher_for_each_backend() {
        for kind in [BackendKind::Pipe, BackendKind::Pty] {
            let launcher = launcher_for(kind);
            let mut process = launcher
                .launch(&LaunchSpec::new("true", vec![]))
                .unwrap();
            let status = process.wait().unwrap();
            assert!(status.success(), "{kind:?} exited with {status}");
        }
    }
}
