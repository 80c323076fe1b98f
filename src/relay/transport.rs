//! Bot transport: the outbound Telegram primitives the relay needs.

use std::fmt;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ReplyParameters};
use tracing::debug;

/// A failed Telegram API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub operation: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to {}: {}", self.operation, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Outbound operations against the chat protocol.
///
/// `forward` keeps attribution to the original sender; `copy` re-sends the
/// content as if the bot wrote it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;

    async fn reply_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<(), TransportError>;

    async fn forward(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    async fn copy(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    /// Whether the user behind `chat_id` hides their account in forwards.
    async fn has_private_forwards(&self, chat_id: i64) -> Result<bool, TransportError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn failed(operation: &'static str) -> impl FnOnce(teloxide::RequestError) -> TransportError {
    move |e| {
        let err = TransportError::new(operation, e.to_string());
        debug!("{}", err);
        err
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(failed("send message"))
    }

    async fn reply_text(&self, chat_id: i64, message_id: i32, text: &str) -> Result<(), TransportError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_parameters(ReplyParameters::new(MessageId(message_id)))
            .await
            .map(|_| ())
            .map_err(failed("reply"))
    }

    async fn forward(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .forward_message(ChatId(to_chat_id), ChatId(from_chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(failed("forward message"))
    }

    async fn copy(&self, to_chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .copy_message(ChatId(to_chat_id), ChatId(from_chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(failed("copy message"))
    }

    async fn has_private_forwards(&self, chat_id: i64) -> Result<bool, TransportError> {
        let chat = self
            .bot
            .get_chat(ChatId(chat_id))
            .await
            .map_err(failed("get chat"))?;
        Ok(chat.has_private_forwards())
    }
}
