//! Redis-backed identity cache. Expiry is delegated to Redis key TTLs.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::relay::cache::{CacheError, IdentityCache, parse_chat_id};
use crate::relay::fingerprint::Fingerprint;

pub struct RedisIdentityCache {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisIdentityCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`). Fails if the server is unreachable.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis at {url}");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}{}", self.prefix, fingerprint)
    }
}

#[async_trait]
impl IdentityCache for RedisIdentityCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<i64>, CacheError> {
        let key = self.key(key);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        debug!("redis GET {key:?} -> {raw:?}");
        raw.map(|value| parse_chat_id(&key, &value)).transpose()
    }

    async fn set(&self, key: &Fingerprint, chat_id: i64, ttl: Duration) -> Result<(), CacheError> {
        let key = self.key(key);
        let mut conn = self.conn.clone();
        // SETEX rejects a zero TTL
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(&key, chat_id.to_string(), seconds).await?;
        debug!("redis SETEX {key:?} {seconds}s -> {chat_id}");
        Ok(())
    }
}
