//! Command-line interface.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use promptctl_core::{
    Action, ActionConfig, BackendKind, DrainMode, Error, Result, SessionFile,
};

/// Drive a prompt-based interactive program (debugger, REPL, compiler shell).
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "promptctl", version, about)]
pub struct Cli {
    /// YAML session file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Prompt pattern (regex matched against the bytes since the last newline)
    #[arg(short, long, value_name = "REGEX")]
    pub prompt: Option<String>,

    /// Queued action, "name arg arg" (repeatable)
    #[arg(short = 'a', long = "action", value_name = "CMD")]
    pub actions: Vec<String>,

    /// Queued action whose output is not echoed (repeatable)
    #[arg(short = 's', long = "silent-action", value_name = "CMD")]
    pub silent_actions: Vec<String>,

    /// Hand stdin to the process after the queue drains
    #[arg(short, long)]
    pub interactive: bool,

    /// Run the process under a pseudo-terminal
    #[arg(long)]
    pub pty: bool,

    /// Match prompts with ANSI escape sequences removed
    #[arg(long)]
    pub strip_ansi: bool,

    /// Per-prompt timeout in milliseconds (0 = none)
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Dispatch each queued action at most once
    #[arg(long)]
    pub consume_once: bool,

    /// Write an asciinema v2 transcript
    #[arg(long, value_name = "FILE")]
    pub record: Option<PathBuf>,

    /// Do not echo process output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the JSON schema of the session file and exit
    #[arg(long)]
    pub print_schema: bool,

    /// Program to run, followed by its arguments
    #[arg(trailing_var_arg = true, value_name = "PROGRAM")]
    pub command: Vec<String>,

    /// `--action` and `--silent-action` values in command-line order
    #[arg(skip)]
    pub queued: Vec<Action>,
}

impl Cli {
    /// Parse the process arguments, exiting on error or `--help`.
    pub fn parse_env() -> Self {
        match Self::try_parse_args(std::env::args_os()) {
            Ok(cli) => cli,
            Err(e) => e.exit(),
        }
    }

    /// Parse `args`, keeping the relative order of normal and silent actions.
    pub fn try_parse_args<I, T>(args: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;
        cli.queued = ordered_actions(&matches);
        Ok(cli)
    }

    /// Build the session file: the `--config` file, if any, with the
    /// command-line options applied on top. The result is validated.
    pub fn to_session_file(&self) -> Result<SessionFile> {
        let mut config = match &self.config {
            Some(path) => SessionFile::parse(&std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("cannot read {}: {}", path.display(), e))
            })?)?,
            None => SessionFile::default(),
        };

        if let Some((program, args)) = self.command.split_first() {
            config.process.program = program.clone();
            config.process.args = args.to_vec();
        }
        if self.pty {
            config.process.backend = BackendKind::Pty;
        }

        if let Some(prompt) = &self.prompt {
            config.prompt.pattern = prompt.clone();
        }
        if self.strip_ansi {
            config.prompt.strip_ansi = true;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.prompt.timeout_ms = timeout_ms;
        }

        if self.interactive {
            config.session.interactive = true;
        }
        if self.consume_once {
            config.session.drain_mode = DrainMode::ConsumeOnce;
        }
        if self.quiet {
            config.session.echo_output = false;
        }

        config.actions.extend(self.queued.iter().map(|action| ActionConfig {
            name: action.name.clone(),
            args: action.args.clone(),
            silent: action.silent,
        }));

        config.validate()?;
        Ok(config)
    }
}

/// Merge `--action` and `--silent-action` occurrences by their position.
fn ordered_actions(matches: &ArgMatches) -> Vec<Action> {
    let mut indexed: Vec<(usize, Action)> = Vec::new();

    for (id, silent) in [("actions", false), ("silent_actions", true)] {
        let (Some(values), Some(indices)) = (
            matches.get_many::<String>(id),
            matches.indices_of(id),
        ) else {
            continue;
        };

        for (value, index) in values.zip(indices) {
            if let Some(mut action) = Action::parse(value) {
                action.silent = silent;
                indexed.push((index, action));
            }
        }
    }

    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, action)| action).collect()
}

/// JSON schema of the session file format.
pub fn session_file_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(SessionFile)).unwrap_or_default()
}
