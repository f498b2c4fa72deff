//! Command Catalog
//!
//! Which commands each engine type implements, built from the syntax that computing
//! nodes declare when they register. System commands are implemented everywhere.

use super::command::SYS_COMMANDS;
use crate::pool::types::EngineType;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared syntax of one command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSyntax {
    /// Argument rules as declared by the node; opaque to the planner.
    pub rules: serde_json::Value,
    /// Needs `earliest`/`latest` arguments.
    pub use_timewindow: bool,
    /// Same input always yields the same output.
    pub idempotent: bool,
}

impl CommandSyntax {
    pub fn from_rules(rules: serde_json::Value) -> Self {
        let flag = |name: &str, default: bool| {
            rules
                .get(name)
                .and_then(|value| value.as_bool())
                .unwrap_or(default)
        };

        Self {
            use_timewindow: flag("use_timewindow", false),
            idempotent: flag("idempotent", true),
            rules,
        }
    }
}

impl Default for CommandSyntax {
    fn default() -> Self {
        Self::from_rules(serde_json::Value::Object(Default::default()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandCatalog {
    by_engine: BTreeMap<EngineType, BTreeMap<String, CommandSyntax>>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the commands a node of `engine_type` declared.
    pub fn register(
        &mut self,
        engine_type: &EngineType,
        syntax: impl IntoIterator<Item = (String, CommandSyntax)>,
    ) {
        let commands = self.by_engine.entry(engine_type.clone()).or_default();
        for name in SYS_COMMANDS {
            commands.entry(name.to_string()).or_default();
        }
        commands.extend(syntax);
    }

    /// Same as `register`, taking the raw `otl_command_syntax` object of a registration.
    pub fn register_rules(
        &mut self,
        engine_type: &EngineType,
        rules: &BTreeMap<String, serde_json::Value>,
    ) {
        self.register(
            engine_type,
            rules
                .iter()
                .map(|(name, rule)| (name.clone(), CommandSyntax::from_rules(rule.clone()))),
        );
    }

    pub fn supports(&self, engine_type: &EngineType, command: &str) -> bool {
        self.by_engine
            .get(engine_type)
            .is_some_and(|commands| commands.contains_key(command))
    }

    pub fn syntax(&self, engine_type: &EngineType, command: &str) -> Option<&CommandSyntax> {
        self.by_engine.get(engine_type)?.get(command)
    }

    pub fn engine_types(&self) -> Vec<EngineType> {
        self.by_engine.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_engine.is_empty()
    }
}
