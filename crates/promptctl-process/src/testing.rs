//! In-memory process backend for tests, benches and documentation.
//!
//! A [`ScriptedProcess`] behaves like a line-oriented REPL: it emits a banner
//! on launch and answers every complete input line through a responder
//! closure. All writes are recorded in a shared [`WriteLog`].

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use promptctl_core::{Error, ExitStatus, Result};

use crate::liveness::{KillSwitch, Liveness};
use crate::stream::{ByteSource, ByteStream, ReadOutcome};
use crate::supervisor::{LaunchSpec, ProcessLauncher, ProcessSupervisor};

/// What a scripted process does after receiving one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Emit these bytes and keep running
    Output(Vec<u8>),
    /// Emit these bytes, then close the output and exit with code 0
    Exit(Vec<u8>),
    /// Emit nothing
    Silence,
}

impl Reply {
    /// Reply with text.
    pub fn output(text: impl AsRef<[u8]>) -> Self {
        Self::Output(text.as_ref().to_vec())
    }

    /// Reply with text and exit.
    pub fn exit(text: impl AsRef<[u8]>) -> Self {
        Self::Exit(text.as_ref().to_vec())
    }
}

type Responder = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

/// Behaviour of a scripted process.
#[derive(Clone)]
pub struct Script {
    banner: Vec<u8>,
    responder: Responder,
}

impl Script {
    /// A process that prints `banner` and then stays silent.
    pub fn new(banner: impl AsRef<[u8]>) -> Self {
        Self {
            banner: banner.as_ref().to_vec(),
            responder: Arc::new(|_| Reply::Silence),
        }
    }

    /// A REPL that prints `prompt` on launch and after every line.
    ///
    /// Each line is answered with `"<line>\n<prompt>"`; the line `quit` makes
    /// it exit without a new prompt.
    pub fn repl(prompt: &str) -> Self {
        let prompt = prompt.to_string();
        Self::new(prompt.clone()).respond_with(move |line| {
            if line == "quit" {
                Reply::exit("bye\n")
            } else {
                Reply::output(format!("{line}\n{prompt}"))
            }
        })
    }

    /// Set the per-line responder.
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("banner", &String::from_utf8_lossy(&self.banner))
            .finish_non_exhaustive()
    }
}

/// Shared record of every line written to scripted processes.
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<String>>>);

impl WriteLog {
    /// Lines written so far, newline included.
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    /// Number of lines written so far.
    pub fn len(&self) -> usize {
        self.0.lock().map(|lines| lines.len()).unwrap_or_default()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line);
        }
    }
}

/// Launcher producing [`ScriptedProcess`]es.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    script: Script,
    log: WriteLog,
    fail_with: Option<String>,
}

impl ScriptedLauncher {
    /// Launch processes following `script`.
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: WriteLog::default(),
            fail_with: None,
        }
    }

    /// A launcher whose every launch fails with `Error::Launch`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            script: Script::new(""),
            log: WriteLog::default(),
            fail_with: Some(reason.into()),
        }
    }

    /// Handle to the write log shared by all launched processes.
    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessSupervisor>> {
        if let Some(reason) = &self.fail_with {
            return Err(Error::launch(&spec.program, reason));
        }
        Ok(Box::new(ScriptedProcess::start(
            self.script.clone(),
            self.log.clone(),
        )))
    }
}

type SharedSender = Arc<Mutex<Option<Sender<Vec<u8>>>>>;

/// An in-memory process driven by a [`Script`].
pub struct ScriptedProcess {
    script: Script,
    log: WriteLog,
    tx: SharedSender,
    output: ByteStream,
    pending: Vec<u8>,
    kill_switch: KillSwitch,
    exited: bool,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for ScriptedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProcess")
            .field("script", &self.script)
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl ScriptedProcess {
    /// Start a scripted process; the banner is emitted immediately.
    pub fn start(script: Script, log: WriteLog) -> Self {
        let (tx, output) = ByteStream::channel();
        if !script.banner.is_empty() {
            let _ = tx.send(script.banner.clone());
        }

        let tx: SharedSender = Arc::new(Mutex::new(Some(tx)));
        let closer = Arc::clone(&tx);
        let kill_switch = KillSwitch::new(Liveness::new(), move || {
            // Dropping the sender closes the stream, like a killed child's pipe.
            if let Ok(mut tx) = closer.lock() {
                tx.take();
            }
            Ok(())
        });

        Self {
            script,
            log,
            tx,
            output,
            pending: Vec::new(),
            kill_switch,
            exited: false,
            exit_status: None,
        }
    }

    fn emit(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        if let Ok(tx) = self.tx.lock() {
            if let Some(tx) = tx.as_ref() {
                let _ = tx.send(bytes);
            }
        }
    }

    fn close(&mut self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        self.exited = true;
    }

    fn answer(&mut self, line: &str) {
        match (self.script.responder)(line) {
            Reply::Output(bytes) => self.emit(bytes),
            Reply::Exit(bytes) => {
                self.emit(bytes);
                self.close();
            }
            Reply::Silence => {}
        }
    }
}

impl ByteSource for ScriptedProcess {
    fn read_byte(&mut self, timeout: Option<Duration>) -> ReadOutcome {
        self.output.read_byte(timeout)
    }

    fn is_alive(&self) -> bool {
        self.kill_switch.is_alive()
    }
}

impl ProcessSupervisor for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.kill_switch.is_alive() || self.exited {
            return Err(Error::Execution(format!(
                "cannot write {} bytes to scripted process",
                bytes.len()
            )));
        }

        debug!("Scripted process received {} bytes", bytes.len());
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).into_owned();
            self.log.push(text.clone());
            if !self.exited {
                self.answer(text.trim_end_matches(['\r', '\n']));
            }
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.kill_switch.kill();
        Ok(())
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let status = if self.kill_switch.liveness().mark_dead() {
            // Natural exit, or an EOF on input: the process ends cleanly.
            self.close();
            ExitStatus::with_code(0)
        } else {
            ExitStatus::signaled()
        };
        self.exit_status = Some(status);
        Ok(status)
    }

    fn try_reap(&mut self) -> Result<Option<ExitStatus>> {
        if self.exited && self.exit_status.is_none() {
            return self.wait().map(Some);
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

/// A [`ByteSource`] over a fixed byte string.
///
/// Reports end-of-stream after the last byte; liveness can be flipped through
/// the [`Liveness`] returned by [`MemorySource::liveness`].
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    liveness: Liveness,
}

impl MemorySource {
    /// Serve `data` then end the stream.
    pub fn new(data: impl AsRef<[u8]>) -> Self {
        Self {
            data: data.as_ref().to_vec(),
            pos: 0,
            liveness: Liveness::new(),
        }
    }

    /// Shared liveness flag.
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl ByteSource for MemorySource {
    fn read_byte(&mut self, _timeout: Option<Duration>) -> ReadOutcome {
        match self.data.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                ReadOutcome::Byte(byte)
            }
            None => ReadOutcome::EndOfStream,
        }
    }

    fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}
