//! Routes chat messages to storage and the imitator.

use std::sync::Arc;

use anyhow::Context;
use imitate_store::{Storage, StoreError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chat::{ChatEvent, ChatPlatform};
use crate::command::{Command, CommandParser};
use crate::imitator::{ImitateOutcome, Imitator};

/// Model depth used when a command does not give one.
pub const DEFAULT_DEPTH: usize = 2;

/// Accepted model depths. Larger models fail to produce output.
pub const DEPTH_RANGE: std::ops::RangeInclusive<usize> = 1..=4;

pub const ABOUT_MESSAGE: &str =
    "Hi! I'm an imitate bot. Ask me to imitate someone and I'll guess what they might say.";
pub const DEPTH_MESSAGE: &str =
    "Sorry, the depth (state size) must be between 1 and 4 inclusive.";
pub const NOT_ENOUGH_DATA_MESSAGE: &str =
    "Sorry, I don't have enough messages from that user to imitate them yet.";
pub const RETRIES_EXCEEDED_MESSAGE: &str =
    "Sorry, I gave up imitating that user after too many attempts. Trying again may work.";
pub const PROMPT_TOO_SHORT_MESSAGE: &str =
    "Sorry, that prompt is too short. It needs at least `depth` words (2 by default).";
pub const INVALID_PROMPT_MESSAGE: &str =
    "Sorry, that user has never said anything starting with that prompt.";
pub const UNKNOWN_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while imitating that user.";

/// Reply for an imitation that produced no text.
pub fn failure_message(outcome: &ImitateOutcome) -> Option<&'static str> {
    match outcome {
        ImitateOutcome::Generated(_) => None,
        ImitateOutcome::NotEnoughData => Some(NOT_ENOUGH_DATA_MESSAGE),
        ImitateOutcome::RetriesExceeded => Some(RETRIES_EXCEEDED_MESSAGE),
        ImitateOutcome::PromptTooShort => Some(PROMPT_TOO_SHORT_MESSAGE),
        ImitateOutcome::InvalidPrompt => Some(INVALID_PROMPT_MESSAGE),
        ImitateOutcome::Unknown => Some(UNKNOWN_ERROR_MESSAGE),
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Mention the imitated user in replies instead of saying "they".
    pub mention_targets: bool,
}

/// Wires a chat platform to [`Storage`] and an [`Imitator`].
pub struct Dispatcher {
    storage: Arc<Storage>,
    platform: Arc<dyn ChatPlatform>,
    imitator: Arc<dyn Imitator>,
    parser: Arc<dyn CommandParser>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<Storage>,
        platform: Arc<dyn ChatPlatform>,
        imitator: Arc<dyn Imitator>,
        parser: Arc<dyn CommandParser>,
    ) -> Self {
        Self {
            storage,
            platform,
            imitator,
            parser,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Handle one inbound message.
    ///
    /// Ordinary text is recorded against its author. Commands are answered
    /// in the channel they came from.
    pub async fn handle_event(&self, event: &ChatEvent) -> anyhow::Result<()> {
        let text = event.text.trim();
        if !self.parser.is_possible_command(text) {
            self.storage
                .append_message(&event.author, &event.text)
                .await
                .with_context(|| format!("failed to record message from {}", event.author))?;
            return Ok(());
        }

        match self.parser.parse(text) {
            Ok(Command::Imitate {
                target,
                depth,
                prompt,
            }) => self.handle_imitate(event, target, depth, prompt).await,
            Ok(Command::Other(action)) => {
                debug!(action = %action, "ignoring command");
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "unparseable command");
                self.reply(event, ABOUT_MESSAGE).await
            }
        }
    }

    async fn handle_imitate(
        &self,
        event: &ChatEvent,
        target: String,
        depth: Option<usize>,
        prompt: Option<String>,
    ) -> anyhow::Result<()> {
        let depth = depth.unwrap_or(DEFAULT_DEPTH);
        if !DEPTH_RANGE.contains(&depth) {
            return self.reply(event, DEPTH_MESSAGE).await;
        }

        let messages = self
            .storage
            .get_messages(&target)
            .await
            .with_context(|| format!("failed to load history of {target}"))?;
        debug!(target = %target, depth, messages = messages.len(), "imitating");

        let imitator = Arc::clone(&self.imitator);
        let outcome = tokio::task::spawn_blocking(move || {
            imitator.imitate(&messages, depth, prompt.as_deref())
        })
        .await
        .context("imitator task failed")?;

        let reply = match outcome {
            ImitateOutcome::Generated(text) => {
                let who = if self.config.mention_targets {
                    self.platform.mention(&target)
                } else {
                    "they".to_string()
                };
                format!("I think {who} might say:\n>>> {text}")
            }
            failure => {
                debug!(target = %target, outcome = ?failure, "imitation failed");
                failure_message(&failure)
                    .unwrap_or(UNKNOWN_ERROR_MESSAGE)
                    .to_string()
            }
        };
        self.reply(event, &reply).await
    }

    async fn reply(&self, event: &ChatEvent, text: &str) -> anyhow::Result<()> {
        self.platform
            .send(text, &event.channel)
            .await
            .with_context(|| format!("failed to send to {}", event.channel))
    }

    /// Handle events until the platform ends or `shutdown` turns true, then
    /// close the storage.
    ///
    /// A failed event is logged and skipped. A platform error or a closed
    /// store ends the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!("dispatcher started");
        let result = loop {
            if *shutdown.borrow() {
                info!("shutdown requested");
                break Ok(());
            }

            let next = tokio::select! {
                next = self.platform.next_event() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
            };

            match next {
                Ok(Some(event)) => {
                    if let Err(e) = self.handle_event(&event).await {
                        if matches!(e.downcast_ref::<StoreError>(), Some(StoreError::StoreClosed)) {
                            break Err(e);
                        }
                        warn!(
                            author = %event.author,
                            error = %format!("{e:#}"),
                            "failed to handle message"
                        );
                    }
                }
                Ok(None) => {
                    info!("platform connection ended");
                    break Ok(());
                }
                Err(e) => break Err(e.context("chat platform failed")),
            }
        };

        match self.storage.close().await {
            Ok(()) | Err(StoreError::StoreClosed) => {}
            Err(e) => return Err(anyhow::Error::new(e).context("failed to close storage")),
        }
        info!("dispatcher stopped");
        result
    }
}
