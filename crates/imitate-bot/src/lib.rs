//! The imitate chat bot: collaborator interfaces and the message dispatcher.
//!
//! The bot records every ordinary message against its author in an
//! [`imitate_store::Storage`] and answers imitate commands by handing the
//! target's history to an [`Imitator`].
//!
//! The chat connection ([`ChatPlatform`]), the text generator ([`Imitator`])
//! and the command language ([`CommandParser`]) are supplied by the embedder.

pub mod bot;
pub mod chat;
pub mod command;
pub mod imitator;

pub use bot::{Dispatcher, DispatcherConfig, DEFAULT_DEPTH, DEPTH_RANGE};
pub use chat::{ChatEvent, ChatPlatform};
pub use command::{Command, CommandParser, ParseError};
pub use imitator::{ImitateOutcome, Imitator};
