//! Command Registry
//!
//! Maps a step's `command_type` to a factory producing a fresh command.
//! Lookups are exact and case-sensitive: type names are canonical
//! constants, not user-typed strings.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::{Command, ShellScript, SqlQuery};
use crate::error::EngineError;

/// Zero-argument constructor for one command type.
pub type CommandFactory = Arc<dyn Fn() -> Box<dyn Command> + Send + Sync>;

/// The commands shipped with the engine.
static BUILTIN: Lazy<CommandRegistry> = Lazy::new(|| {
    let mut registry = CommandRegistry::new();
    registry.register(SqlQuery::TYPE_NAME, || Box::new(SqlQuery::default()));
    registry.register(ShellScript::TYPE_NAME, || Box::new(ShellScript::default()));
    registry
});

/// Static mapping from type name to command factory.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    factories: BTreeMap<String, CommandFactory>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared builtin registry.
    pub fn builtin() -> &'static CommandRegistry {
        &BUILTIN
    }

    /// An owned copy of the builtin registry that can be extended.
    pub fn with_builtins() -> Self {
        BUILTIN.clone()
    }

    /// Registers a factory, replacing any previous one for the same name.
    pub fn register<F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Command> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Arc::new(factory));
        self
    }

    /// Produces a fresh command for `type_name`.
    pub fn resolve(&self, type_name: &str) -> Result<Box<dyn Command>, EngineError> {
        self.factories
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnknownCommandType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingCommand;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = CommandRegistry::builtin();
        assert_eq!(registry.type_names(), vec!["ShellScript", "SqlQuery"]);
    }

    #[test]
    fn test_resolve_builtin() {
        let command = CommandRegistry::builtin().resolve("SqlQuery").unwrap();
        assert_eq!(command.type_name(), "SqlQuery");
    }

    #[test]
    fn test_resolution_is_case_sensitive() {
        let result = CommandRegistry::builtin().resolve("sqlquery");
        assert!(matches!(result, Err(EngineError::UnknownCommandType(name)) if name == "sqlquery"));
    }

    #[test]
    fn test_unknown_type() {
        assert!(!CommandRegistry::builtin().contains("Email"));
        assert!(CommandRegistry::builtin().resolve("Email").is_err());
    }

    #[test]
    fn test_with_builtins_is_extendable() {
        let mut registry = CommandRegistry::with_builtins();
        registry.register(RecordingCommand::TYPE_NAME, || Box::new(RecordingCommand::default()));

        assert!(registry.contains(RecordingCommand::TYPE_NAME));
        assert!(registry.contains("SqlQuery"));
        assert!(!CommandRegistry::builtin().contains(RecordingCommand::TYPE_NAME));
    }

    #[test]
    fn test_each_resolve_yields_fresh_instance() {
        let registry = CommandRegistry::builtin();
        let mut first = registry.resolve("ShellScript").unwrap();
        let mut values = std::collections::HashMap::new();
        values.insert("Script".to_string(), "echo hi".to_string());
        first.set_parameters(&values);

        let second = registry.resolve("ShellScript").unwrap();
        assert!(second.parameters().is_empty());
        assert!(!first.parameters().is_empty());
    }
}
