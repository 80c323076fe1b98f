//! Tracing layer that mirrors WARN/ERROR events into a Telegram chat.
//!
//! Relay failures are per-message and never stop the dispatcher, so this is
//! where an operator actually sees them. Events arriving close together are
//! batched into one message.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram rejects messages above 4096 chars.
const MAX_MESSAGE_CHARS: usize = 4000;
const FLUSH_EVERY: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 20;

pub struct ErrorSinkLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl ErrorSinkLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut pending: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_EVERY);

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(line) => {
                            pending.push(line);
                            if pending.len() >= MAX_BATCH {
                                flush(&bot, chat_id, &mut pending).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut pending).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut pending).await,
                }
            }
        });

        Self { tx }
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, pending: &mut Vec<String>) {
    if pending.is_empty() {
        return;
    }
    let text = format_batch(pending);
    pending.clear();
    // Logging here would feed back into this layer.
    if let Err(e) = bot.send_message(chat_id, text).await {
        eprintln!("Failed to send log batch to Telegram: {e}");
    }
}

fn format_batch(lines: &[String]) -> String {
    let combined = lines.join("\n");
    if combined.chars().count() <= MAX_MESSAGE_CHARS {
        return combined;
    }
    let truncated: String = combined.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{truncated}...")
}

fn format_event(level: Level, target: &str, message: &str) -> String {
    let marker = if level == Level::ERROR { "❌" } else { "⚠️" };
    format!("{marker} [{target}] {message}")
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for ErrorSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format_event(level, event.metadata().target(), &visitor.message);
        if self.tx.send(line).is_err() {
            eprintln!("Error sink closed, message dropped");
        }
    }
}
