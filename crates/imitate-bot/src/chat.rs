//! Chat platform boundary.

use async_trait::async_trait;

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Platform identity of the sender.
    pub author: String,
    /// Where replies go.
    pub channel: String,
    pub text: String,
}

impl ChatEvent {
    pub fn new(
        author: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            channel: channel.into(),
            text: text.into(),
        }
    }
}

/// Connection to a chat platform.
///
/// Implementations filter out messages sent by bots, including this one.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Next inbound message, or `None` once the connection has ended.
    ///
    /// Must be cancel safe: the dispatcher races it against shutdown.
    async fn next_event(&self) -> anyhow::Result<Option<ChatEvent>>;

    /// Send `text` to `destination`.
    async fn send(&self, text: &str, destination: &str) -> anyhow::Result<()>;

    /// How to mention `identity` in an outgoing message.
    fn mention(&self, identity: &str) -> String {
        format!("<@{identity}>")
    }
}
