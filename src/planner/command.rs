//! Commands
//!
//! A command is a name plus an ordered list of arguments. Arguments are either
//! positional or named, and a value may itself be a nested subsearch pipeline.

use super::result_address::ResultAddress;

use serde::{Deserialize, Serialize};
use std::fmt;

pub const ASYNC: &str = "async";
pub const AWAIT: &str = "await";
pub const SET_CACHE: &str = "set_cache";

pub const SYS_WRITE_INTERPROC: &str = "sys_write_interproc";
pub const SYS_READ_INTERPROC: &str = "sys_read_interproc";
pub const SYS_WRITE_RESULT: &str = "sys_write_result";

/// Commands every computing node implements.
pub const SYS_COMMANDS: [&str; 3] = [SYS_WRITE_INTERPROC, SYS_READ_INTERPROC, SYS_WRITE_RESULT];

/// Named arguments injected by the planner.
pub const EARLIEST: &str = "earliest";
pub const LATEST: &str = "latest";
pub const SYS_TIMESTAMP: &str = "sys_timestamp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Term(String),
    Integer(i64),
    Boolean(bool),
    Subsearch(Vec<Command>),
}

impl ArgValue {
    /// Scalar rendering, `None` for subsearches.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ArgValue::Term(value) => Some(value.clone()),
            ArgValue::Integer(value) => Some(value.to_string()),
            ArgValue::Boolean(value) => Some(value.to_string()),
            ArgValue::Subsearch(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(value) => Some(*value),
            ArgValue::Term(value) => value.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: ArgValue,
}

impl Argument {
    pub fn positional(value: ArgValue) -> Self {
        Self { key: None, value }
    }

    pub fn named(key: impl Into<String>, value: ArgValue) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    /// Bridging command reading or writing the dataframe stored at `address`.
    pub fn bridge(name: &str, address: &ResultAddress) -> Self {
        Self::new(name)
            .with_arg(Argument::positional(ArgValue::Term(address.path.clone())))
            .with_arg(Argument::positional(ArgValue::Term(
                address.storage.as_str().to_string(),
            )))
    }

    pub fn named(&self, key: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|arg| arg.key.as_deref() == Some(key))
            .map(|arg| &arg.value)
    }

    pub fn has_named(&self, key: &str) -> bool {
        self.named(key).is_some()
    }

    /// Indices of the arguments holding subsearches, in argument order.
    pub fn subsearch_positions(&self) -> Vec<usize> {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, arg)| matches!(arg.value, ArgValue::Subsearch(_)))
            .map(|(index, _)| index)
            .collect()
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Term(value) if value.chars().any(|c| c.is_whitespace() || c == ',') => {
                write!(f, "\"{}\"", value)
            }
            ArgValue::Subsearch(commands) => write!(f, "[{}]", render_pipeline(commands)),
            other => write!(f, "{}", other.as_text().unwrap_or_default()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (index, arg) in self.args.iter().enumerate() {
            let separator = if index == 0 { " " } else { ", " };
            match &arg.key {
                Some(key) => write!(f, "{}{}={}", separator, key, arg.value)?,
                None => write!(f, "{}{}", separator, arg.value)?,
            }
        }
        Ok(())
    }
}

/// Renders a pipeline back to query text.
pub fn render_pipeline(commands: &[Command]) -> String {
    commands
        .iter()
        .map(|command| command.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}
