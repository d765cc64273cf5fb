//! Actions, the action dispatch table, and wire formatting.
//!
//! An [`Action`] is one queued command destined for the controlled process.
//! Before it is written, the action name is resolved through an
//! [`ActionTable`] which may rewrite it (the `confirm` alias becomes `y`) or
//! mark it as a termination action (`kill`).

use std::collections::HashMap;

use lazy_static::lazy_static;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One command destined for the controlled process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    /// Command name (first word on the wire)
    pub name: String,
    /// Positional arguments, joined with single spaces
    #[serde(default)]
    pub args: Vec<String>,
    /// Do not stream the process output produced by this action
    #[serde(default)]
    pub silent: bool,
}

impl Action {
    /// Create an action.
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            silent: false,
        }
    }

    /// Create an action whose output is not streamed.
    pub fn silent(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            silent: true,
            ..Self::new(name, args)
        }
    }

    /// Parse `"name arg arg"` into an action, splitting on whitespace.
    ///
    /// Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        Some(Self::new(name, words.map(str::to_string).collect()))
    }
}

/// Invocation descriptor for an action name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionSpec {
    /// Text written in place of the action name
    pub alias: Option<String>,
    /// Dispatching this action ends the session instead of writing to it
    #[serde(default)]
    pub terminates: bool,
}

impl ActionSpec {
    /// Descriptor that rewrites the action name.
    pub fn alias(target: impl Into<String>) -> Self {
        Self {
            alias: Some(target.into()),
            terminates: false,
        }
    }

    /// Descriptor for a session-ending action.
    pub fn termination() -> Self {
        Self {
            alias: None,
            terminates: true,
        }
    }
}

lazy_static! {
    static ref BUILTIN_ACTIONS: HashMap<&'static str, ActionSpec> = {
        let mut table = HashMap::new();
        // Affirmative answer to yes/no questions
        table.insert("confirm", ActionSpec::alias("y"));
        table.insert("kill", ActionSpec::termination());
        table
    };
}

/// Static dispatch table mapping action names to invocation descriptors.
///
/// Lookups are exact (case-sensitive) and happen at dispatch time.
#[derive(Debug, Clone)]
pub struct ActionTable {
    entries: HashMap<String, ActionSpec>,
}

impl ActionTable {
    /// Table pre-populated with the built-in actions (`confirm`, `kill`).
    pub fn builtin() -> Self {
        let entries = BUILTIN_ACTIONS
            .iter()
            .map(|(name, spec)| (name.to_string(), spec.clone()))
            .collect();
        Self { entries }
    }

    /// Table with no entries; every action is sent verbatim.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register or replace the descriptor for `name`.
    pub fn register(&mut self, name: impl Into<String>, spec: ActionSpec) {
        self.entries.insert(name.into(), spec);
    }

    /// Look up the descriptor for `name`.
    pub fn lookup(&self, name: &str) -> Option<&ActionSpec> {
        self.entries.get(name)
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Turns actions into the bytes written to the process.
pub trait CommandFormatter: Send {
    /// Wire text for `action`, including the trailing newline.
    fn format(&self, action: &Action) -> String;

    /// Whether dispatching `action` should end the session.
    fn terminates(&self, _action: &Action) -> bool {
        false
    }
}

/// Formatter backed by an [`ActionTable`].
///
/// `foo ["bar", "baz"]` becomes `"foo bar baz\n"`, `confirm` becomes `"y\n"`.
#[derive(Debug, Clone, Default)]
pub struct DefaultFormatter {
    table: ActionTable,
}

impl DefaultFormatter {
    /// Formatter using the built-in table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Formatter using a custom table.
    pub fn with_table(table: ActionTable) -> Self {
        Self { table }
    }

    /// The dispatch table.
    pub fn table(&self) -> &ActionTable {
        &self.table
    }
}

impl CommandFormatter for DefaultFormatter {
    fn format(&self, action: &Action) -> String {
        let name = self
            .table
            .lookup(&action.name)
            .and_then(|spec| spec.alias.as_deref())
            .unwrap_or(&action.name);

        let mut command = name.to_string();
        if !action.args.is_empty() {
            command.push(' ');
            command.push_str(&action.args.join(" "));
        }
        terminate_line(&command)
    }

    fn terminates(&self, action: &Action) -> bool {
        self.table
            .lookup(&action.name)
            .map(|spec| spec.terminates)
            .unwrap_or(false)
    }
}

/// Strip trailing CR/LF from `text` and append exactly one `\n`.
pub fn terminate_line(text: &str) -> String {
    let mut line = text.trim_end_matches(['\r', '\n']).to_string();
    line.push('\n');
    line
}
