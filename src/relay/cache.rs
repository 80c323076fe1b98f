//! Identity cache: fingerprint -> chat id of the user who sent the message.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::relay::fingerprint::Fingerprint;

/// Errors from an identity cache backend.
#[derive(Debug)]
pub enum CacheError {
    /// The Redis server could not be reached or rejected the command.
    Redis(redis::RedisError),
    /// Reading or writing the snapshot file failed.
    Snapshot(rusqlite::Error),
    /// A stored value is not a chat id.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis(e) => write!(f, "redis error: {}", e),
            Self::Snapshot(e) => write!(f, "snapshot error: {}", e),
            Self::InvalidValue { key, value } => {
                write!(f, "value '{}' stored under '{}' is not a chat id", value, key)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Redis(e) => Some(e),
            Self::Snapshot(e) => Some(e),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis(e)
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Snapshot(e)
    }
}

/// Expiring association between message fingerprints and user chats.
///
/// Absent and expired keys are `Ok(None)`; only backend failures are errors.
/// Writes overwrite, so colliding fingerprints resolve to the last writer.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> Result<Option<i64>, CacheError>;

    async fn set(&self, key: &Fingerprint, chat_id: i64, ttl: Duration) -> Result<(), CacheError>;
}

/// Parse a stored value into a chat id. Chat ids are stored as decimal strings.
pub fn parse_chat_id(key: &str, raw: &str) -> Result<i64, CacheError> {
    raw.trim().parse::<i64>().map_err(|_| CacheError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
