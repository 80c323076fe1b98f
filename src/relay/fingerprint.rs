//! Content fingerprints for messages whose sender Telegram hides.
//!
//! When a user enables "private forwards", a forwarded copy of their message
//! only carries their display name and the original date. The fingerprint is
//! built from those fields so the admin's reply can be traced back to the
//! chat that sent the original.

use std::fmt;

/// Deterministic lookup key for one relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

/// Display name as Telegram reports it for hidden senders.
///
/// An empty last name collapses to just the first name, so the write side
/// (which knows both parts) and the read side (which only sees the combined
/// name) always agree.
pub fn display_name(first_name: &str, last_name: &str) -> String {
    if last_name.is_empty() {
        first_name.to_string()
    } else {
        format!("{first_name} {last_name}")
    }
}

impl Fingerprint {
    /// Build from the sender's name parts, as seen on the user's own message.
    pub fn build(first_name: &str, last_name: &str, text: &str, caption: &str, unix_ts: i64) -> Self {
        Self::from_display_name(&display_name(first_name, last_name), text, caption, unix_ts)
    }

    /// Build from a hidden sender name, as seen on a forwarded copy.
    pub fn from_display_name(name: &str, text: &str, caption: &str, unix_ts: i64) -> Self {
        let mut key = String::with_capacity(name.len() + text.len() + caption.len() + 32);
        for field in [name, text, caption] {
            push_field(&mut key, field);
        }
        key.push_str(&unix_ts.to_string());
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Length-prefixed so user text can never imitate a field boundary.
fn push_field(key: &mut String, field: &str) {
    key.push_str(&field.len().to_string());
    key.push(':');
    key.push_str(field);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
