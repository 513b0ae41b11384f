//! Command parsing boundary.

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Imitate `target`, optionally with a model depth and a seed prompt.
    Imitate {
        target: String,
        depth: Option<usize>,
        prompt: Option<String>,
    },
    /// A command this dispatcher does not act on.
    Other(String),
}

/// Text looked like a command but did not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid command: {message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns chat text into commands.
pub trait CommandParser: Send + Sync {
    /// Cheap prefilter. Text that fails it is ordinary conversation.
    fn is_possible_command(&self, text: &str) -> bool;

    fn parse(&self, text: &str) -> Result<Command, ParseError>;
}
