//! Error types for promptctl.

use thiserror::Error;

use crate::SessionState;

/// Main error type for promptctl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The executable could not be found, started, or was not permitted to run
    #[error("Failed to launch '{program}': {reason}")]
    Launch {
        /// Program that was being launched
        program: String,
        /// Underlying cause
        reason: String,
    },

    /// A write or dispatch was attempted against a process that is not alive
    #[error("Process not alive: {0}")]
    Execution(String),

    /// Timeout waiting for the prompt (only when a timeout is configured)
    #[error("Timeout waiting for prompt after {0}ms")]
    PromptTimeout(u64),

    /// Prompt pattern failed to compile
    #[error("Invalid prompt pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Regex compiler message
        reason: String,
    },

    /// Operation not permitted in the current session state
    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the session was in
        from: SessionState,
        /// State the operation would have entered
        to: SessionState,
    },

    /// Session already terminated
    #[error("Session already terminated")]
    SessionTerminated,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a launch error for `program`.
    pub fn launch(program: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Launch {
            program: program.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error() {
        let err = Error::launch("/no/such/gdb", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "Failed to launch '/no/such/gdb': No such file or directory"
        );
    }

    #[test]
    fn test_execution_error() {
        let err = Error::Execution("write 'run\\n'".to_string());
        assert_eq!(err.to_string(), "Process not alive: write 'run\\n'");
    }

    #[test]
    fn test_prompt_timeout_error() {
        let err = Error::PromptTimeout(5000);
        assert_eq!(err.to_string(), "Timeout waiting for prompt after 5000ms");
    }

    #[test]
    fn test_invalid_pattern_error() {
        let err = Error::InvalidPattern {
            pattern: "([unclosed".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert!(err.to_string().starts_with("Invalid prompt pattern '([unclosed'"));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = Error::InvalidTransition {
            from: SessionState::Terminated,
            to: SessionState::Dispatching,
        };
        assert_eq!(
            err.to_string(),
            "Invalid session transition: Terminated -> Dispatching"
        );
    }

    #[test]
    fn test_session_terminated_error() {
        let err = Error::SessionTerminated;
        assert_eq!(err.to_string(), "Session already terminated");
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config("process.program is empty".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: process.program is empty"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<i32>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_debug() {
        let err = Error::Other("test".to_string());
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Other"));
    }
}
