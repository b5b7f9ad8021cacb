//! Step Commands
//!
//! Every step type is implemented by a [`Command`]. The runner creates a
//! fresh command per step through the [`CommandRegistry`], hands it the
//! step's parameters, validates, then executes.
//!
//! # Structure
//!
//! - [`registry`]: type name to factory mapping
//! - [`sql_query`]: `SqlQuery`, runs SQL against a SQLite database
//! - [`shell`]: `ShellScript`, runs a bash script

pub mod registry;
pub mod shell;
pub mod sql_query;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::error::CommandError;
use crate::model::Id;

pub use registry::{CommandFactory, CommandRegistry};
pub use shell::ShellScript;
pub use sql_query::SqlQuery;

/// How a parameter's value is meant to be edited and interpreted.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterKind {
    String,
    MultilineText,
    Filename,
}

/// Declares one parameter a command understands.
///
/// A `repeatable` descriptor stands for an open-ended numbered family:
/// `OutputFile` covers `OutputFile01`, `OutputFile02`, and so on.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
    pub repeatable: bool,
}

impl ParameterDescriptor {
    pub fn required(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
            repeatable: false,
        }
    }

    pub fn optional(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn numbered(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            repeatable: true,
            ..Self::optional(name, kind, description)
        }
    }
}

/// Case-insensitive parameter values.
///
/// Keys are lower-cased on insertion and on lookup, so `SQL`, `sql` and
/// `Sql` name the same parameter. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Looks up a required parameter, failing with `MissingParameter`.
    pub fn required(&self, name: &str, command: &str) -> Result<&str, CommandError> {
        self.get(name).ok_or_else(|| CommandError::missing(name, command))
    }

    /// Collects the numbered members of a family (`OutputFile01`, ...) in order.
    ///
    /// Numbering starts at 1 and the family may have gaps.
    pub fn numbered(&self, prefix: &str) -> Vec<(u32, &str)> {
        let prefix = prefix.to_lowercase();
        let mut found: Vec<(u32, &str)> = self
            .values
            .iter()
            .filter_map(|(key, value)| {
                let number = key.strip_prefix(&prefix)?.parse::<u32>().ok()?;
                (number > 0 && !value.trim().is_empty()).then_some((number, value.as_str()))
            })
            .collect();
        found.sort_by_key(|(number, _)| *number);
        found
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<&HashMap<String, String>> for Parameters {
    fn from(values: &HashMap<String, String>) -> Self {
        let mut parameters = Parameters::new();
        for (name, value) in values {
            parameters.insert(name, value.clone());
        }
        parameters
    }
}

/// Formats the name of member `number` of a numbered family, e.g. `OutputFile03`.
pub fn numbered_name(prefix: &str, number: u32) -> String {
    format!("{}{:02}", prefix, number)
}

/// Where a command is running and where its outputs go.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub execution_id: Id,
    pub execution_step_id: Id,
    /// Per-execution directory: `<work_dir>/execution-<execution_id>`
    pub output_dir: PathBuf,
}

impl CommandContext {
    pub fn new(work_dir: &Path, execution_id: Id, execution_step_id: Id) -> Self {
        Self {
            execution_id,
            execution_step_id,
            output_dir: work_dir.join(format!("execution-{}", execution_id)),
        }
    }

    /// Resolves a declared output name inside this execution's directory.
    ///
    /// Creates parent directories. Absolute paths and `..` are rejected so
    /// outputs of different executions never collide.
    pub fn output_path(
        &self,
        parameter: &str,
        command: &str,
        name: &str,
    ) -> Result<PathBuf, CommandError> {
        let relative = Path::new(name.trim());
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(CommandError::invalid(
                parameter,
                command,
                format!("'{}' must be a relative path inside the execution directory", name),
            ));
        }

        let path = self.output_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CommandError::execution(command.to_string(), e))?;
            debug!("Output directory ready: {}", parent.display());
        }
        Ok(path)
    }
}

/// The contract every step implementation satisfies.
///
/// Call order per step: [`set_parameters`](Command::set_parameters),
/// [`validate`](Command::validate), [`execute`](Command::execute).
pub trait Command: Send {
    /// The registry name of this command, e.g. `SqlQuery`.
    fn type_name(&self) -> &'static str;

    /// Parameters this command understands. Pure.
    fn declare_parameters(&self) -> Vec<ParameterDescriptor>;

    /// Stores a case-insensitive copy of `values`. Unknown keys are kept but ignored.
    fn set_parameters(&mut self, values: &HashMap<String, String>);

    /// The values stored by the last `set_parameters` call.
    fn parameters(&self) -> &Parameters;

    /// Checks every declared required parameter is present.
    ///
    /// Runs before `execute` and must not have side effects.
    fn validate(&self) -> Result<(), CommandError> {
        for descriptor in self.declare_parameters() {
            if descriptor.required && !descriptor.repeatable {
                self.parameters().required(&descriptor.name, self.type_name())?;
            }
        }
        Ok(())
    }

    /// Performs the step's side effect.
    fn execute(&mut self, ctx: &CommandContext) -> Result<(), CommandError>;
}
