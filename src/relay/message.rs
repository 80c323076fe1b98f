//! Inbound message model, decoupled from teloxide types.

use teloxide::types::{Message, MessageOrigin, User};

/// The person who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Sender {
    fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.0 as i64,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
        }
    }
}

/// Where a forwarded message originally came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOrigin {
    /// Attribution survived: the original author's id is known.
    User { user_id: i64, username: Option<String> },
    /// The author hides their account; only name and date remain.
    HiddenUser { sender_name: String, unix_ts: i64 },
    /// Forwarded from a chat or channel, never produced by the relay.
    Other,
}

impl ForwardOrigin {
    fn from_telegram(origin: &MessageOrigin) -> Self {
        match origin {
            MessageOrigin::User { sender_user, .. } => Self::User {
                user_id: sender_user.id.0 as i64,
                username: sender_user.username.clone(),
            },
            MessageOrigin::HiddenUser { date, sender_user_name, .. } => Self::HiddenUser {
                sender_name: sender_user_name.clone(),
                unix_ts: date.timestamp(),
            },
            _ => Self::Other,
        }
    }
}

/// The message an admin replied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliedMessage {
    pub origin: Option<ForwardOrigin>,
    pub text: String,
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    /// Anything with a non-text payload; the caption is the readable part.
    Media,
}

/// A message as the relay sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender: Option<Sender>,
    pub kind: MessageKind,
    pub text: String,
    pub caption: String,
    pub unix_ts: i64,
    pub reply_to: Option<RepliedMessage>,
}

impl InboundMessage {
    pub fn from_telegram(msg: &Message) -> Self {
        let kind = if msg.text().is_some() {
            MessageKind::Text
        } else {
            MessageKind::Media
        };

        let reply_to = msg.reply_to_message().map(|reply| RepliedMessage {
            origin: reply.forward_origin().map(ForwardOrigin::from_telegram),
            text: reply.text().unwrap_or("").to_string(),
            caption: reply.caption().unwrap_or("").to_string(),
        });

        Self {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
            sender: msg.from.as_ref().map(Sender::from_user),
            kind,
            text: msg.text().unwrap_or("").to_string(),
            caption: msg.caption().unwrap_or("").to_string(),
            unix_ts: msg.date.timestamp(),
            reply_to,
        }
    }

    /// Human-readable part: text for text messages, caption for media.
    pub fn readable(&self) -> &str {
        match self.kind {
            MessageKind::Text => &self.text,
            MessageKind::Media => &self.caption,
        }
    }
}

/// Notice sent to the admin chat ahead of every forwarded user message.
pub fn sender_notice(sender: &Sender) -> String {
    format!(
        "Информация о пользователе:\nИмя: {}\nФамилия: {}\nUsername: @{}\nID: {}\nСообщение от пользователя:\n",
        sender.first_name,
        sender.last_name.as_deref().unwrap_or(""),
        sender.username.as_deref().unwrap_or(""),
        sender.user_id,
    )
}
