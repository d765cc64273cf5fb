//! Session controller: drives a prompt-based process through its lifecycle.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info, warn};

use promptctl_core::{
    action::terminate_line, Action, CommandFormatter, DefaultFormatter, Error, ExitStatus, Result,
    SessionFile, SessionId, SessionState,
};
use promptctl_process::{KillSwitch, LaunchSpec, ProcessLauncher, ProcessSupervisor};

use crate::queue::{ActionQueue, DrainReport};
use crate::sink::{NullSink, OutputSink};
use crate::watcher::{PromptPattern, PromptWatcher};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The process exited or closed its output on its own
    ProcessExited,
    /// The controller terminated the process (`terminate` or a `kill` action)
    Terminated,
    /// A [`SessionCanceller`] fired
    Cancelled,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: bool,
    switch: Option<KillSwitch>,
}

/// Thread-safe handle that ends a session from outside.
///
/// Cancelling kills the running process through its [`KillSwitch`]; a
/// controller blocked waiting for a prompt returns within one poll interval.
/// Cancelling before the process is launched kills it as soon as it starts.
#[derive(Debug, Clone, Default)]
pub struct SessionCanceller {
    state: Arc<Mutex<CancelState>>,
}

impl SessionCanceller {
    /// Create an unarmed canceller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the session.
    pub fn cancel(&self) {
        let switch = match self.state.lock() {
            Ok(mut state) => {
                state.cancelled = true;
                state.switch.clone()
            }
            Err(e) => {
                error!("Canceller lock poisoned: {}", e);
                return;
            }
        };

        if let Some(switch) = switch {
            if switch.kill() {
                info!("Session cancelled, process killed");
            }
        }
    }

    /// Whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().map(|state| state.cancelled).unwrap_or(true)
    }

    fn arm(&self, switch: KillSwitch) {
        let cancelled = match self.state.lock() {
            Ok(mut state) => {
                state.switch = Some(switch.clone());
                state.cancelled
            }
            Err(_) => true,
        };
        if cancelled {
            switch.kill();
        }
    }
}

/// Result of a manual hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteractReport {
    /// Input lines forwarded to the process
    pub lines: usize,
    /// The process ended during the hand-off
    pub process_ended: bool,
}

/// Drives one external process: launch, queued actions, manual hand-off.
///
/// The controller owns the process exclusively. Output read while waiting for
/// prompts goes to the [`OutputSink`], except the output of silent actions.
///
/// # Example
///
/// ```
/// use promptctl_process::testing::{Script, ScriptedLauncher};
/// use promptctl_process::LaunchSpec;
/// use promptctl_session::{PromptPattern, SessionController};
///
/// # fn example() -> promptctl_core::Result<()> {
/// let launcher = ScriptedLauncher::new(Script::repl("(gdb) "));
/// let log = launcher.log();
///
/// let mut session = SessionController::new(
///     launcher,
///     LaunchSpec::new("gdb", vec!["-q".to_string()]),
///     PromptPattern::new(r"^\(gdb\) ")?,
/// )
/// .with_sink(Vec::new());
/// session.add_action("break", vec!["main".to_string()]);
/// session.add_action("run", vec![]);
///
/// session.run(None::<std::io::Empty>)?;
/// assert_eq!(log.lines(), vec!["break main\n", "run\n"]);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct SessionController<L, S = NullSink> {
    id: SessionId,
    launcher: L,
    spec: LaunchSpec,
    watcher: PromptWatcher,
    formatter: Box<dyn CommandFormatter>,
    queue: ActionQueue,
    sink: S,
    process: Option<Box<dyn ProcessSupervisor>>,
    state: SessionState,
    exit_status: Option<ExitStatus>,
    end_reason: Option<EndReason>,
    canceller: SessionCanceller,
}

impl<L, S> std::fmt::Debug for SessionController<L, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("program", &self.spec.program)
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("exit_status", &self.exit_status)
            .finish_non_exhaustive()
    }
}

impl<L: ProcessLauncher> SessionController<L, NullSink> {
    /// Create a controller that discards process output.
    pub fn new(launcher: L, spec: LaunchSpec, pattern: PromptPattern) -> Self {
        Self {
            id: SessionId::new(),
            launcher,
            spec,
            watcher: PromptWatcher::new(pattern),
            formatter: Box::new(DefaultFormatter::new()),
            queue: ActionQueue::new(),
            sink: NullSink,
            process: None,
            state: SessionState::Idle,
            exit_status: None,
            end_reason: None,
            canceller: SessionCanceller::new(),
        }
    }

    /// Create a controller from a validated session file.
    ///
    /// The queued actions, dispatch table aliases, prompt settings and drain
    /// mode all come from the file.
    pub fn from_config(launcher: L, config: &SessionFile) -> Result<Self> {
        config.validate()?;

        let mut controller = Self {
            watcher: PromptWatcher::from_settings(&config.prompt)?,
            formatter: Box::new(DefaultFormatter::with_table(config.action_table())),
            queue: ActionQueue::with_mode(config.session.drain_mode),
            ..Self::new(
                launcher,
                LaunchSpec::from(&config.process),
                PromptPattern::new(&config.prompt.pattern)?,
            )
        };
        for action in config.queued_actions() {
            controller.push_action(action);
        }
        Ok(controller)
    }
}

impl<L: ProcessLauncher, S: OutputSink> SessionController<L, S> {
    /// Replace the output sink.
    pub fn with_sink<T: OutputSink>(self, sink: T) -> SessionController<L, T> {
        SessionController {
            id: self.id,
            launcher: self.launcher,
            spec: self.spec,
            watcher: self.watcher,
            formatter: self.formatter,
            queue: self.queue,
            sink,
            process: self.process,
            state: self.state,
            exit_status: self.exit_status,
            end_reason: self.end_reason,
            canceller: self.canceller,
        }
    }

    /// Replace the command formatter.
    pub fn with_formatter(mut self, formatter: Box<dyn CommandFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Replace the prompt watcher.
    pub fn with_watcher(mut self, watcher: PromptWatcher) -> Self {
        self.watcher = watcher;
        self
    }

    /// Replace the queue, keeping nothing from the old one.
    pub fn with_queue(mut self, queue: ActionQueue) -> Self {
        self.queue = queue;
        self
    }

    /// Session identifier used in logs.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Exit status, once the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Why the session ended, once it has.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// Handle for cancelling the session from another thread.
    pub fn canceller(&self) -> SessionCanceller {
        self.canceller.clone()
    }

    /// The queued actions.
    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// The output sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the controller and return its output sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Queue an action whose output is streamed.
    pub fn add_action(&mut self, name: impl Into<String>, args: Vec<String>) {
        self.queue.append(name, args, false);
    }

    /// Queue an action whose output is not streamed.
    pub fn add_silent_action(&mut self, name: impl Into<String>, args: Vec<String>) {
        self.queue.append(name, args, true);
    }

    /// Queue a prepared action.
    pub fn push_action(&mut self, action: Action) {
        self.queue.push(action);
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Launch the process and wait for its first prompt.
    ///
    /// Returns `Ok(false)` when the process ended before showing a prompt;
    /// the session is then terminated. A launch failure also terminates the
    /// session and is returned as `Error::Launch`.
    pub fn start(&mut self) -> Result<bool> {
        self.transition(SessionState::Launching)?;
        info!(
            "Session {} launching '{}' with args {:?}",
            self.id, self.spec.program, self.spec.args
        );

        let process = match self.launcher.launch(&self.spec) {
            Ok(process) => process,
            Err(e) => {
                error!("Session {} failed to launch: {}", self.id, e);
                self.state = SessionState::Terminated;
                return Err(e);
            }
        };
        self.canceller.arm(process.kill_switch());
        self.transition(SessionState::AwaitingPrompt)?;

        let process = self.process.insert(process);
        let sink = &mut self.sink;
        let ready = self
            .watcher
            .await_prompt(&mut **process, |byte| sink.write_output(&[byte]));
        self.sink.flush();

        match ready {
            Ok(true) => {
                info!("Session {} ready (pid {:?})", self.id, self.process_pid());
                self.transition(SessionState::Dispatching)?;
                Ok(true)
            }
            Ok(false) => {
                warn!("Session {}: process ended before its first prompt", self.id);
                self.finish()?;
                Ok(false)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Send queued actions, waiting for a prompt after each.
    ///
    /// In the default replay mode every call re-sends the whole queue. The
    /// drain stops early when the process ends or a termination action is
    /// dispatched; the session is then terminated and `completed` is false.
    pub fn drain(&mut self) -> Result<DrainReport> {
        self.ensure_running()?;
        self.transition(SessionState::Dispatching)?;

        let process = self
            .process
            .as_deref_mut()
            .ok_or(Error::SessionTerminated)?;
        let formatter = &*self.formatter;
        let watcher = &mut self.watcher;
        let sink = &mut self.sink;
        let mut terminated = false;

        let result = self.queue.drain(formatter, |action, command| {
            if formatter.terminates(action) {
                info!("Dispatching termination action '{}'", action.name);
                process.terminate()?;
                terminated = true;
                return Ok(false);
            }
            dispatch_command(&mut *process, &mut *watcher, &mut *sink, action, command)
        });

        match result {
            Ok(report) => {
                if terminated {
                    self.end_reason = Some(EndReason::Terminated);
                }
                if !report.completed {
                    self.finish()?;
                }
                Ok(report)
            }
            Err(e) => {
                error!("Session {} drain failed: {}", self.id, e);
                self.abort();
                Err(e)
            }
        }
    }

    /// Forward lines from `input` to the process until either side ends.
    ///
    /// Each line is newline-stripped, written with `\n`, and followed by a
    /// prompt wait. When the input runs out the process is left running and
    /// the caller decides what happens next.
    ///
    /// `input` is read on its own thread, so a cancel or an exit of the
    /// process ends the hand-off even while no line is being typed.
    pub fn interact<R>(&mut self, input: R) -> Result<InteractReport>
    where
        R: BufRead + Send + 'static,
    {
        self.ensure_running()?;
        self.transition(SessionState::Manual)?;
        info!("Session {} handing control to manual input", self.id);

        let lines = spawn_line_reader(input)?;
        let poll_interval = self.watcher.poll_interval();
        let mut report = InteractReport::default();
        loop {
            let line = match lines.recv_timeout(poll_interval) {
                Ok(line) => line?,
                Err(RecvTimeoutError::Timeout) => {
                    if self.process_gone()? {
                        info!("Session {}: process ended during manual input", self.id);
                        self.finish()?;
                        report.process_ended = true;
                        return Ok(report);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Manual input ended after {} lines", report.lines);
                    return Ok(report);
                }
            };

            let command = terminate_line(&line);
            let process = self
                .process
                .as_deref_mut()
                .ok_or(Error::SessionTerminated)?;
            self.sink.record_input(command.as_bytes());
            let sink = &mut self.sink;

            let ready = process
                .write(command.as_bytes())
                .and_then(|()| {
                    self.watcher
                        .await_prompt(process, |byte| sink.write_output(&[byte]))
                });
            self.sink.flush();
            report.lines += 1;

            match ready {
                Ok(true) => {}
                Ok(false) => {
                    self.finish()?;
                    report.process_ended = true;
                    return Ok(report);
                }
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            }
        }
    }

    /// Run the whole session: start, drain, optional hand-off, finish.
    ///
    /// After the queue (and the manual input, if any) is exhausted the
    /// process is terminated. Returns the process exit status.
    pub fn run<R>(&mut self, input: Option<R>) -> Result<ExitStatus>
    where
        R: BufRead + Send + 'static,
    {
        if self.start()? {
            let report = self.drain()?;
            if report.completed {
                if let Some(input) = input {
                    self.interact(input)?;
                }
            }
        }

        if self.state != SessionState::Terminated {
            self.terminate()?;
        }
        self.wait()
    }

    /// Terminate the process and end the session. Idempotent.
    pub fn terminate(&mut self) -> Result<()> {
        if self.state == SessionState::Terminated {
            return Ok(());
        }

        match self.process.as_deref_mut() {
            Some(process) => {
                if process.is_alive() {
                    self.end_reason.get_or_insert(EndReason::Terminated);
                }
                process.terminate()?;
            }
            None => {
                self.end_reason.get_or_insert(EndReason::Terminated);
            }
        }
        self.finish()
    }

    /// Block until the process exits and return its status.
    ///
    /// Fails with `Error::SessionTerminated` when the session never launched
    /// a process.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        if self.process.is_none() {
            return Err(Error::SessionTerminated);
        }
        self.finish()?;
        self.exit_status.ok_or(Error::SessionTerminated)
    }

    fn process_pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|process| process.pid())
    }

    /// Poll the process; true once it is no longer alive.
    fn process_gone(&mut self) -> Result<bool> {
        match self.process.as_deref_mut() {
            Some(process) => {
                process.try_reap()?;
                Ok(!process.is_alive())
            }
            None => Ok(true),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            SessionState::Terminated => Err(Error::SessionTerminated),
            _ if self.process.is_none() => Err(Error::InvalidTransition {
                from: self.state,
                to: SessionState::Dispatching,
            }),
            _ => Ok(()),
        }
    }

    /// Reap the process and move to `Terminated`.
    fn finish(&mut self) -> Result<()> {
        if let Some(mut process) = self.process.take() {
            let status = process.wait()?;
            info!("Session {} process finished: {}", self.id, status);
            self.exit_status = Some(status);
        }

        let reason = if self.canceller.is_cancelled() {
            EndReason::Cancelled
        } else {
            EndReason::ProcessExited
        };
        let reason = *self.end_reason.get_or_insert(reason);
        debug!("Session {} ended: {:?}", self.id, reason);

        self.state = SessionState::Terminated;
        Ok(())
    }

    /// Kill and reap after an error, keeping the original error for the caller.
    fn abort(&mut self) {
        if let Some(process) = self.process.as_deref_mut() {
            if let Err(e) = process.terminate() {
                warn!("Failed to terminate after error: {}", e);
            }
        }
        self.end_reason.get_or_insert(EndReason::Terminated);
        if let Err(e) = self.finish() {
            warn!("Failed to reap after error: {}", e);
        }
    }
}

/// Read `input` line by line on a separate thread.
///
/// The thread stops at end of input, on a read error, or once the receiver is
/// gone and the next line arrives.
fn spawn_line_reader<R>(mut input: R) -> Result<Receiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("manual-input".to_string())
        .spawn(move || loop {
            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Write one command and wait for the next prompt.
///
/// The command always reaches the process before the wait begins.
fn dispatch_command<S: OutputSink>(
    process: &mut dyn ProcessSupervisor,
    watcher: &mut PromptWatcher,
    sink: &mut S,
    action: &Action,
    command: &str,
) -> Result<bool> {
    debug!("Dispatching {:?}", command.trim_end());
    sink.record_input(command.as_bytes());
    process.write(command.as_bytes())?;

    let silent = action.silent;
    let ready = watcher.await_prompt(process, |byte| {
        if !silent {
            sink.write_output(&[byte]);
        }
    });
    sink.flush();

    if let Ok(false) = ready {
        info!("Process ended while running '{}'", action.name);
    }
    ready
}
