use thiserror::Error;

/// The query cannot be decomposed into node jobs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Not found async command with name <{0}> for await command")]
    UndefinedAwait(String),

    #[error("Second await with name <{0}> is not allowed")]
    DuplicateAwait(String),

    #[error("Two async jobs with name <{0}>")]
    DuplicateAsync(String),

    #[error("Async subsearches with names {} are never awaited", .0.join(" "))]
    UnawaitedAsync(Vec<String>),

    #[error("Command <{0}> is not supported by any computing node type")]
    UnsupportedCommand(String),

    #[error("Query has no commands")]
    EmptyQuery,

    #[error("Subsearch of command <{0}> has no commands")]
    EmptySubsearch(String),

    #[error("Command <{command}> requires argument <{argument}>")]
    MissingArgument { command: String, argument: String },

    #[error("Directive <{0}> must follow a command")]
    DirectiveWithoutCommand(String),
}

/// The query text could not be turned into commands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Unexpected token <{token}> at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("Subsearch opened at position {0} is never closed")]
    UnterminatedSubsearch(usize),

    #[error("String opened at position {0} is never closed")]
    UnterminatedString(usize),

    #[error("Empty command at position {0}")]
    EmptyCommand(usize),
}
