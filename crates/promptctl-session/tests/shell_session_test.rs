//! Integration tests driving real `/bin/sh` REPLs.

#![cfg(unix)]

use std::time::{Duration, Instant};

use promptctl_core::{Error, SessionState};
use promptctl_process::{LaunchSpec, PipeLauncher, PtyLauncher};
use promptctl_session::{EndReason, PromptPattern, PromptWatcher, SessionController};

const REPL: &str = r#"printf '(shell) '
while IFS= read -r line; do
  [ "$line" = exit ] && exit 7
  echo "got $line"
  printf '(shell) '
done"#;

fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

fn shell_prompt() -> PromptPattern {
    PromptPattern::new(r"^\(shell\) ").unwrap()
}

fn output(session: &SessionController<impl promptctl_process::ProcessLauncher, Vec<u8>>) -> String {
    String::from_utf8_lossy(session.sink()).into_owned()
}

#[test]
fn test_pipe_session_drains_actions() {
    let mut session =
        SessionController::new(PipeLauncher::new(), sh(REPL), shell_prompt()).with_sink(Vec::new());
    session.add_action("alpha", vec![]);
    session.add_action("beta", vec!["x".to_string(), "y".to_string()]);

    assert!(session.start().unwrap());
    let report = session.drain().unwrap();

    assert!(report.completed);
    assert_eq!(
        output(&session),
        "(shell) got alpha\n(shell) got beta x y\n(shell) "
    );

    session.terminate().unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(session.end_reason(), Some(EndReason::Terminated));
}

#[test]
fn test_exit_code_is_reported() {
    let mut session = SessionController::new(PipeLauncher::new(), sh(REPL), shell_prompt());
    session.add_action("one", vec![]);
    session.add_action("exit", vec![]);
    session.add_action("unreached", vec![]);

    let status = session.run(None::<&[u8]>).unwrap();
    assert_eq!(status.code, Some(7));
    assert_eq!(session.end_reason(), Some(EndReason::ProcessExited));
}

#[test]
fn test_banner_then_eof() {
    let mut session = SessionController::new(
        PipeLauncher::new(),
        sh("echo Booting..."),
        shell_prompt(),
    )
    .with_sink(Vec::new());

    assert!(!session.start().unwrap());
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(output(&session), "Booting...\n");
    assert!(session.exit_status().unwrap().success());
}

#[test]
fn test_missing_executable() {
    let mut session = SessionController::new(
        PipeLauncher::new(),
        LaunchSpec::new("/nonexistent/promptctl-repl", vec![]),
        shell_prompt(),
    );

    assert!(matches!(session.start(), Err(Error::Launch { .. })));
    assert_eq!(session.state(), SessionState::Terminated);
}

#[test]
fn test_kill_action_stops_real_process() {
    let mut session = SessionController::new(PipeLauncher::new(), sh(REPL), shell_prompt());
    session.add_action("kill", vec![]);

    let status = session.run(None::<&[u8]>).unwrap();
    assert!(!status.success());
    assert_eq!(session.end_reason(), Some(EndReason::Terminated));
}

#[test]
fn test_interactive_hand_off() {
    let mut session =
        SessionController::new(PipeLauncher::new(), sh(REPL), shell_prompt()).with_sink(Vec::new());
    session.add_action("auto", vec![]);

    session.start().unwrap();
    session.drain().unwrap();
    let report = session.interact(&b"typed one\ntyped two\n"[..]).unwrap();

    assert_eq!(report.lines, 2);
    assert!(!report.process_ended);
    assert!(output(&session).ends_with("got typed one\n(shell) got typed two\n(shell) "));
    session.terminate().unwrap();
}

#[test]
fn test_cancel_hung_process() {
    let mut session = SessionController::new(PipeLauncher::new(), sh("sleep 30"), shell_prompt());
    let canceller = session.canceller();

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });

    let start = Instant::now();
    assert!(!session.start().unwrap());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(session.end_reason(), Some(EndReason::Cancelled));
}

#[test]
fn test_pty_session_with_coloured_prompt() {
    let script = r#"printf '\033[1;32m(shell)\033[0m '
while IFS= read -r line; do
  echo "got $line"
  printf '\033[1;32m(shell)\033[0m '
done"#;
    let watcher = PromptWatcher::new(shell_prompt()).with_strip_ansi(true);
    let mut session = SessionController::new(PtyLauncher::new(), sh(script), shell_prompt())
        .with_watcher(watcher)
        .with_sink(Vec::new());
    session.add_action("hi", vec![]);

    assert!(session.start().unwrap());
    assert!(session.drain().unwrap().completed);
    assert!(output(&session).contains("got hi"));

    session.terminate().unwrap();
}

#[test]
fn test_exit_noticed_while_background_job_holds_output() {
    let script = "(sleep 6 &); printf '(shell) '; read x; exit 0";
    let mut session = SessionController::new(PipeLauncher::new(), sh(script), shell_prompt());
    session.add_action("quit", vec![]);

    assert!(session.start().unwrap());
    let start = Instant::now();
    let report = session.drain().unwrap();

    assert!(!report.completed);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(session.end_reason(), Some(EndReason::ProcessExited));
    assert!(session.exit_status().unwrap().success());
}

/// Input that never delivers a line until its sender is dropped.
struct IdleInput(std::sync::mpsc::Receiver<()>);

impl std::io::Read for IdleInput {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        let _ = self.0.recv();
        Ok(0)
    }
}

#[test]
fn test_exit_noticed_during_idle_manual_input() {
    let mut session = SessionController::new(
        PipeLauncher::new(),
        sh("printf '(shell) '; sleep 0.2; exit 3"),
        shell_prompt(),
    );

    assert!(session.start().unwrap());
    session.drain().unwrap();

    let (_hold, idle) = std::sync::mpsc::channel::<()>();
    let start = Instant::now();
    let report = session
        .interact(std::io::BufReader::new(IdleInput(idle)))
        .unwrap();

    assert!(report.process_ended);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(session.exit_status().unwrap().code, Some(3));
    assert_eq!(session.end_reason(), Some(EndReason::ProcessExited));
}

#[test]
fn test_terminate_kills_process_ignoring_sigterm() {
    let script = "trap '' TERM; printf '(shell) '; while :; do sleep 1; done";
    let mut session = SessionController::new(PipeLauncher::new(), sh(script), shell_prompt());

    assert!(session.start().unwrap());
    let start = Instant::now();
    session.terminate().unwrap();

    assert!(start.elapsed() < Duration::from_secs(6));
    assert!(!session.exit_status().unwrap().success());
    assert_eq!(session.end_reason(), Some(EndReason::Terminated));
}
