//! Session file configuration.
//!
//! A session file describes one controlled-process interaction:
//!
//! ```yaml
//! process:
//!   program: gdb
//!   args: ["-q", "./a.out"]
//! prompt:
//!   pattern: '^\(gdb\) $'
//! session:
//!   interactive: true
//! actions:
//!   - name: break
//!     args: [main]
//!   - name: run
//!   - name: confirm
//! aliases:
//!   - name: c
//!     target: continue
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::action::{Action, ActionSpec, ActionTable};
use crate::{Dimensions, Error};

/// Session configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
#[serde(default)]
pub struct SessionFile {
    /// Process launch settings
    pub process: ProcessSettings,
    /// Prompt detection settings
    pub prompt: PromptSettings,
    /// Session behaviour
    pub session: SessionSettings,
    /// Actions queued before launch
    pub actions: Vec<ActionConfig>,
    /// Extra entries for the action dispatch table
    pub aliases: Vec<AliasConfig>,
}

impl SessionFile {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config = Self::parse(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without validating, for files completed by CLI overrides.
    pub fn parse(yaml: &str) -> crate::Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.process.program.trim().is_empty() {
            return Err(Error::Config("process.program cannot be empty".to_string()));
        }

        if self.process.backend == BackendKind::Pty
            && (self.process.dimensions.rows == 0 || self.process.dimensions.cols == 0)
        {
            return Err(Error::Config("pty dimensions must be > 0".to_string()));
        }

        self.prompt.validate()?;

        for action in &self.actions {
            if action.name.trim().is_empty() {
                return Err(Error::Config("action name cannot be empty".to_string()));
            }
        }

        for alias in &self.aliases {
            alias.validate()?;
        }

        Ok(())
    }

    /// Queued actions in declaration order.
    pub fn queued_actions(&self) -> Vec<Action> {
        self.actions.iter().map(ActionConfig::to_action).collect()
    }

    /// Built-in dispatch table extended with the configured aliases.
    pub fn action_table(&self) -> ActionTable {
        let mut table = ActionTable::builtin();
        for alias in &self.aliases {
            table.register(alias.name.clone(), alias.to_spec());
        }
        table
    }
}

/// How the process's standard streams are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Plain pipes for stdin/stdout
    #[default]
    Pipe,
    /// Pseudo-terminal (input is echoed, programs may colour output)
    Pty,
}

/// Process launch settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProcessSettings {
    /// Executable path or name resolved through PATH
    pub program: String,
    /// Positional arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Stream backend
    pub backend: BackendKind,
    /// Merge stderr into the watched output (pipe backend only)
    pub merge_stderr: bool,
    /// Terminal size (pty backend only)
    pub dimensions: Dimensions,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec![],
            cwd: None,
            env: vec![],
            backend: BackendKind::Pipe,
            merge_stderr: false,
            dimensions: Dimensions::default(),
        }
    }
}

/// Prompt detection settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PromptSettings {
    /// Regular expression matched against the bytes since the last newline
    pub pattern: String,
    /// Remove ANSI escape sequences before matching
    pub strip_ansi: bool,
    /// Per-prompt timeout in milliseconds (0 = wait forever)
    pub timeout_ms: u64,
    /// How often a blocked wait rechecks liveness, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            strip_ansi: false,
            timeout_ms: 0,
            poll_interval_ms: 50,
        }
    }
}

impl PromptSettings {
    /// Validate the prompt settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pattern.is_empty() {
            return Err(Error::Config("prompt.pattern cannot be empty".to_string()));
        }

        regex::bytes::Regex::new(&self.pattern).map_err(|e| Error::InvalidPattern {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })?;

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("prompt.poll_interval_ms must be > 0".to_string()));
        }

        Ok(())
    }

    /// Configured timeout, `None` when waits are unbounded.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_ms > 0).then(|| std::time::Duration::from_millis(self.timeout_ms))
    }
}

/// Whether repeated drains replay the whole queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// Every drain re-sends every queued action
    #[default]
    Replay,
    /// Each action is sent at most once successfully
    ConsumeOnce,
}

/// Session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionSettings {
    /// Hand stdin to the process once the queue is drained
    pub interactive: bool,
    /// Queue drain semantics
    pub drain_mode: DrainMode,
    /// Echo process output to stdout
    pub echo_output: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            interactive: false,
            drain_mode: DrainMode::Replay,
            echo_output: true,
            log_level: "info".to_string(),
        }
    }
}

/// A queued action in a session file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActionConfig {
    /// Command name
    pub name: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Suppress output streaming for this action
    #[serde(default)]
    pub silent: bool,
}

impl ActionConfig {
    /// Convert to an [`Action`].
    pub fn to_action(&self) -> Action {
        Action {
            name: self.name.clone(),
            args: self.args.clone(),
            silent: self.silent,
        }
    }
}

/// Extra dispatch table entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AliasConfig {
    /// Action name as written in the queue
    pub name: String,
    /// Text written in place of the name
    #[serde(default)]
    pub target: Option<String>,
    /// Dispatching this action ends the session
    #[serde(default)]
    pub terminates: bool,
}

impl AliasConfig {
    /// Validate the alias entry.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("alias name cannot be empty".to_string()));
        }

        if self.target.is_none() && !self.terminates {
            return Err(Error::Config(format!(
                "alias '{}' needs a target or terminates: true",
                self.name
            )));
        }

        Ok(())
    }

    /// Convert to an [`ActionSpec`].
    pub fn to_spec(&self) -> ActionSpec {
        ActionSpec {
            alias: self.target.clone(),
            terminates: self.terminates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GDB_SESSION: &str = r#"
process:
  program: gdb
  args: ["-q", "./a.out"]
  backend: pty
  dimensions:
    rows: 30
    cols: 120

prompt:
  pattern: '^\(gdb\) $'
  strip_ansi: true
  timeout_ms: 10000

session:
  interactive: true
  drain_mode: consume_once
  log_level: debug

actions:
  - name: break
    args: [main]
  - name: run
  - name: confirm
    silent: true

aliases:
  - name: c
    target: continue
  - name: quit
    terminates: true
"#;

    #[test]
    fn test_parse_yaml() {
        let config = SessionFile::from_yaml(GDB_SESSION).unwrap();
        assert_eq!(config.process.program, "gdb");
        assert_eq!(config.process.args, vec!["-q", "./a.out"]);
        assert_eq!(config.process.backend, BackendKind::Pty);
        assert_eq!(config.process.dimensions, Dimensions::new(30, 120));
        assert!(config.prompt.strip_ansi);
        assert_eq!(
            config.prompt.timeout(),
            Some(std::time::Duration::from_millis(10000))
        );
        assert!(config.session.interactive);
        assert_eq!(config.session.drain_mode, DrainMode::ConsumeOnce);
        assert_eq!(config.session.log_level, "debug");
        assert_eq!(config.actions.len(), 3);
        assert!(config.actions[2].silent);
    }

    #[test]
    fn test_defaults() {
        let config = SessionFile::from_yaml("process:\n  program: sh\nprompt:\n  pattern: '\\$ $'\n")
            .unwrap();
        assert_eq!(config.process.backend, BackendKind::Pipe);
        assert!(!config.process.merge_stderr);
        assert_eq!(config.prompt.timeout(), None);
        assert_eq!(config.prompt.poll_interval_ms, 50);
        assert!(!config.session.interactive);
        assert_eq!(config.session.drain_mode, DrainMode::Replay);
        assert!(config.session.echo_output);
        assert!(config.actions.is_empty());
    }

    #[test]
    fn test_queued_actions() {
        let config = SessionFile::from_yaml(GDB_SESSION).unwrap();
        let actions = config.queued_actions();
        assert_eq!(actions[0], Action::new("break", vec!["main".to_string()]));
        assert_eq!(actions[1], Action::new("run", vec![]));
        assert_eq!(actions[2], Action::silent("confirm", vec![]));
    }

    #[test]
    fn test_action_table_with_aliases() {
        let config = SessionFile::from_yaml(GDB_SESSION).unwrap();
        let table = config.action_table();
        assert_eq!(table.lookup("c").unwrap().alias.as_deref(), Some("continue"));
        assert!(table.lookup("quit").unwrap().terminates);
        assert!(table.lookup("confirm").is_some());
    }

    #[test]
    fn test_missing_program() {
        let result = SessionFile::from_yaml("prompt:\n  pattern: '> $'\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_skips_validation() {
        let config = SessionFile::parse("prompt:\n  pattern: '> $'\n").unwrap();
        assert!(config.process.program.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_pattern() {
        let result = SessionFile::from_yaml("process:\n  program: sh\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let yaml = "process:\n  program: sh\nprompt:\n  pattern: '([unclosed'\n";
        let result = SessionFile::from_yaml(yaml);
        assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    }

    #[test]
    fn test_invalid_alias() {
        let yaml = "process:\n  program: sh\nprompt:\n  pattern: '> '\naliases:\n  - name: x\n";
        let result = SessionFile::from_yaml(yaml);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_poll_interval() {
        let mut config = SessionFile::default();
        config.process.program = "sh".to_string();
        config.prompt.pattern = "> ".to_string();
        config.prompt.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pty_dimensions() {
        let mut config = SessionFile::default();
        config.process.program = "sh".to_string();
        config.process.backend = BackendKind::Pty;
        config.process.dimensions = Dimensions::new(0, 80);
        config.prompt.pattern = "> ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = SessionFile::from_yaml("process: [unterminated");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GDB_SESSION.as_bytes()).unwrap();

        let config = SessionFile::from_file(file.path()).unwrap();
        assert_eq!(config.process.program, "gdb");
    }

    #[test]
    fn test_from_missing_file() {
        let result = SessionFile::from_file("/nonexistent/session.yml");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_schema_generation() {
        let schema = schemars::schema_for!(SessionFile);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("drain_mode"));
        assert!(json.contains("strip_ansi"));
    }
}
