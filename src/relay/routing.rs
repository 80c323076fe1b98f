//! Routing decisions for inbound messages.

use crate::relay::error::RelayError;
use crate::relay::fingerprint::Fingerprint;
use crate::relay::message::{ForwardOrigin, InboundMessage, RepliedMessage, Sender};

/// Which way a message travels, decided before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction<'a> {
    /// The admin answered a message in the admin chat.
    AdminReply(&'a RepliedMessage),
    /// The admin chat talking among itself; not relayed.
    AdminChatter,
    /// An end user wrote to the bot.
    User(&'a Sender),
    /// No sender (e.g. a channel post); nothing to relay.
    Anonymous,
}

pub fn direction(msg: &InboundMessage, admin_chat_id: i64) -> Direction<'_> {
    if msg.chat_id == admin_chat_id {
        return match msg.reply_to {
            Some(ref replied) => Direction::AdminReply(replied),
            None => Direction::AdminChatter,
        };
    }
    match msg.sender {
        Some(ref sender) => Direction::User(sender),
        None => Direction::Anonymous,
    }
}

/// Final classification of a relayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Forward attribution kept the user id; no cache needed.
    AdminReplyWithNativeSender { user_id: i64 },
    /// Attribution is hidden; the user is found by fingerprint.
    AdminReplyNeedsCacheLookup { fingerprint: Fingerprint },
    /// The user hides their account; remember them under this fingerprint.
    UserMessagePrivate { fingerprint: Fingerprint },
    UserMessagePublic,
}

/// Route an admin reply from what Telegram kept on the replied-to forward.
pub fn admin_reply_route(replied: &RepliedMessage) -> Result<Route, RelayError> {
    match replied.origin {
        Some(ForwardOrigin::User { user_id, .. }) => Ok(Route::AdminReplyWithNativeSender { user_id }),
        Some(ForwardOrigin::HiddenUser {
            ref sender_name,
            unix_ts,
        }) => Ok(Route::AdminReplyNeedsCacheLookup {
            fingerprint: Fingerprint::from_display_name(sender_name, &replied.text, &replied.caption, unix_ts),
        }),
        Some(ForwardOrigin::Other) | None => Err(RelayError::NotRelayed),
    }
}

/// Route a user message given the chat's privacy flag.
pub fn user_route(msg: &InboundMessage, sender: &Sender, is_private: bool) -> Route {
    if !is_private {
        return Route::UserMessagePublic;
    }
    Route::UserMessagePrivate {
        fingerprint: Fingerprint::build(
            &sender.first_name,
            sender.last_name.as_deref().unwrap_or(""),
            &msg.text,
            &msg.caption,
            msg.unix_ts,
        ),
    }
}
