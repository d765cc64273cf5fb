//! Session identity, state machine and exit status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a controller session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session controller.
///
/// ```text
/// Idle -> Launching -> AwaitingPrompt -> Dispatching <-> Manual
///            |               |               |             |
///            +---------------+---------------+-------------+--> Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SessionState {
    /// Not started yet
    Idle,
    /// Process is being launched
    Launching,
    /// Waiting for the initial prompt
    AwaitingPrompt,
    /// Queued actions are being sent
    Dispatching,
    /// External input is being forwarded
    Manual,
    /// Process ended or was killed
    Terminated,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Only forward transitions exist, except that `Dispatching` may be
    /// re-entered from `Manual` (a later drain) or from itself.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Launching) => true,
            (Launching, AwaitingPrompt) => true,
            (AwaitingPrompt, Dispatching) => true,
            (Dispatching, Dispatching) | (Dispatching, Manual) => true,
            (Manual, Manual) | (Manual, Dispatching) => true,
            (Terminated, _) => false,
            (_, Terminated) => true,
            _ => false,
        }
    }

    /// Whether the session has a live process it can talk to.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingPrompt | SessionState::Dispatching | SessionState::Manual
        )
    }
}

/// Final exit status of the controlled process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ExitStatus {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl ExitStatus {
    /// Exit status with a known code.
    pub fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Exit status of a process terminated by a signal.
    pub fn signaled() -> Self {
        Self { code: None }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}
