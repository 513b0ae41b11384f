//! Text generation boundary.

/// Result of one imitation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImitateOutcome {
    Generated(String),
    /// The history is too small to build a model from.
    NotEnoughData,
    /// No sentence came out within the attempt budget.
    RetriesExceeded,
    /// The prompt has fewer words than the state size.
    PromptTooShort,
    /// The prompt never occurs in the history.
    InvalidPrompt,
    Unknown,
}

impl ImitateOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

/// Produces text in the style of a message history.
///
/// Called off the async runtime, so implementations may be CPU heavy.
pub trait Imitator: Send + Sync {
    /// Generate from `messages`, oldest first, using a model of
    /// `state_size` words. A `prompt` seeds the start of the output.
    fn imitate(&self, messages: &[String], state_size: usize, prompt: Option<&str>)
        -> ImitateOutcome;
}
