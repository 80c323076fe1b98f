//! Relay module - routes messages between users and the admin chat.

pub mod cache;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod message;
pub mod redis_cache;
pub mod routing;
pub mod snapshot_cache;
pub mod transport;

pub use cache::{CacheError, IdentityCache};
pub use engine::{Delivery, RelayEngine, RelaySettings};
pub use error::RelayError;
pub use fingerprint::Fingerprint;
pub use message::InboundMessage;
pub use redis_cache::RedisIdentityCache;
pub use snapshot_cache::{SnapshotIdentityCache, spawn_persist_task};
pub use transport::{TelegramClient, Transport};
