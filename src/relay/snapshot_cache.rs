//! In-process identity cache with periodic snapshots to a SQLite file.
//!
//! Entries live in memory; a background task persists them every interval and
//! once more at shutdown, so a restart keeps the replies of the last day
//! routable. Expired entries are skipped on read, pruned on persist and never
//! reloaded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::relay::cache::{CacheError, IdentityCache};
use crate::relay::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy)]
struct Entry {
    chat_id: i64,
    /// Unix seconds after which the entry is gone.
    expires_at: i64,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

pub struct SnapshotIdentityCache {
    entries: Mutex<HashMap<String, Entry>>,
    snapshot: Option<Mutex<Connection>>,
}

impl SnapshotIdentityCache {
    /// Cache without a snapshot file; contents are lost on exit.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Open (or create) the snapshot at `path` and restore its unexpired entries.
    pub fn load_or_new(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                fingerprint TEXT PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
        "#,
        )?;

        let now = Utc::now().timestamp();
        let mut entries = HashMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT fingerprint, chat_id, expires_at FROM identities WHERE expires_at > ?1")?;
            let rows = stmt.query_map(params![now], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Entry {
                        chat_id: row.get(1)?,
                        expires_at: row.get(2)?,
                    },
                ))
            })?;
            for row in rows {
                let (key, entry) = row?;
                entries.insert(key, entry);
            }
        }

        info!("Restored {} identities from {:?}", entries.len(), path);
        Ok(Self {
            entries: Mutex::new(entries),
            snapshot: Some(Mutex::new(conn)),
        })
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Utc::now().timestamp();
        self.lock_entries().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries and write the rest to the snapshot file.
    /// Returns the number of entries written (0 without a snapshot file).
    pub fn persist(&self) -> Result<usize, CacheError> {
        let now = Utc::now().timestamp();
        let live: Vec<(String, Entry)> = {
            let mut entries = self.lock_entries();
            entries.retain(|_, e| e.is_live(now));
            entries.iter().map(|(k, e)| (k.clone(), *e)).collect()
        };

        let Some(ref snapshot) = self.snapshot else {
            return Ok(0);
        };

        let mut conn = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM identities", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO identities (fingerprint, chat_id, expires_at) VALUES (?1, ?2, ?3)")?;
            for (key, entry) in &live {
                stmt.execute(params![key, entry.chat_id, entry.expires_at])?;
            }
        }
        tx.commit()?;
        Ok(live.len())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IdentityCache for SnapshotIdentityCache {
    async fn get(&self, key: &Fingerprint) -> Result<Option<i64>, CacheError> {
        let now = Utc::now().timestamp();
        Ok(self
            .lock_entries()
            .get(key.as_str())
            .filter(|e| e.is_live(now))
            .map(|e| e.chat_id))
    }

    async fn set(&self, key: &Fingerprint, chat_id: i64, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl_secs);
        self.lock_entries()
            .insert(key.as_str().to_string(), Entry { chat_id, expires_at });
        Ok(())
    }
}

/// Persist `cache` every `every` until `shutdown` is notified, then persist once more.
pub fn spawn_persist_task(
    cache: Arc<SnapshotIdentityCache>,
    every: Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately; nothing new to save yet.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    persist_logged(&cache).await;
                    break;
                }
                _ = interval.tick() => {
                    persist_logged(&cache).await;
                }
            }
        }
    })
}

async fn persist_logged(cache: &Arc<SnapshotIdentityCache>) {
    let cache = cache.clone();
    match tokio::task::spawn_blocking(move || cache.persist()).await {
        Ok(Ok(count)) => info!("Persisted {count} identities"),
        Ok(Err(e)) => error!("Failed to persist identity snapshot: {e}"),
        Err(e) => error!("Snapshot task panicked: {e}"),
    }
}
