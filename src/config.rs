use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

use crate::relay::RelaySettings;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
const DEFAULT_KEY_PREFIX: &str = "relay:";

const DEFAULT_GREETING: &str = "السلام عليكم ورحمة الله وبركاته\n\
Я бот обратной связи. Отправьте мне свой вопрос или сообщение, и я передам его администратору.";

const DEFAULT_ACKNOWLEDGEMENT: &str = "جزاك اللهُ خيرًا\nВаше сообщение успешно отправлено администратору.";

const DEFAULT_FAILURE_NOTICE_PREFIX: &str = "Ошибка у пользователя: ";

#[derive(Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
enum CacheFile {
    Redis {
        url: Option<String>,
        key_prefix: Option<String>,
    },
    Snapshot {
        /// SQLite file; defaults to `<data_dir>/identities.db`.
        path: Option<String>,
        #[serde(default = "default_persist_interval_minutes")]
        persist_interval_minutes: u64,
    },
}

fn default_persist_interval_minutes() -> u64 {
    60
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Chat that receives user messages and whose replies are relayed back.
    admin_chat_id: i64,
    cache: Option<CacheFile>,
    #[serde(default = "default_entry_ttl_hours")]
    entry_ttl_hours: u64,
    /// Directory for state files (logs, snapshots). Defaults to current directory.
    data_dir: Option<String>,
    /// Chat that receives WARN/ERROR log lines.
    error_chat_id: Option<i64>,
    greeting: Option<String>,
    acknowledgement: Option<String>,
    #[serde(default = "default_true")]
    acknowledge_users: bool,
    failure_notice_prefix: Option<String>,
}

fn default_entry_ttl_hours() -> u64 {
    24
}

fn default_true() -> bool {
    true
}

/// Where sender identities are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis { url: String, key_prefix: String },
    Snapshot { path: PathBuf, persist_interval: Duration },
}

pub struct Config {
    /// Path to the config file
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub admin_chat_id: ChatId,
    pub cache: CacheBackend,
    /// How long a private sender stays resolvable.
    pub entry_ttl: Duration,
    /// Directory for state files (logs, snapshots).
    pub data_dir: PathBuf,
    pub error_chat_id: Option<ChatId>,
    /// Reply to `/start`.
    pub greeting: String,
    /// Confirmation sent to users after relaying; `None` when disabled.
    pub acknowledgement: Option<String>,
    pub failure_notice_prefix: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.admin_chat_id == 0 {
            return Err(ConfigError::Validation("admin_chat_id must be a non-zero chat id".into()));
        }
        if file.entry_ttl_hours == 0 {
            return Err(ConfigError::Validation("entry_ttl_hours must be at least 1".into()));
        }
        let entry_ttl_secs = file
            .entry_ttl_hours
            .checked_mul(60 * 60)
            .ok_or_else(|| ConfigError::Validation("entry_ttl_hours is too large".into()))?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let cache = match file.cache {
            None => CacheBackend::Redis {
                url: DEFAULT_REDIS_URL.to_string(),
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            },
            Some(CacheFile::Redis { url, key_prefix }) => CacheBackend::Redis {
                url: url.unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
                key_prefix: key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            },
            Some(CacheFile::Snapshot { path, persist_interval_minutes }) => {
                if persist_interval_minutes == 0 {
                    return Err(ConfigError::Validation(
                        "cache.persist_interval_minutes must be at least 1".into(),
                    ));
                }
                let persist_interval_secs = persist_interval_minutes.checked_mul(60).ok_or_else(|| {
                    ConfigError::Validation("cache.persist_interval_minutes is too large".into())
                })?;
                CacheBackend::Snapshot {
                    path: path
                        .map(PathBuf::from)
                        .unwrap_or_else(|| data_dir.join("identities.db")),
                    persist_interval: Duration::from_secs(persist_interval_secs),
                }
            }
        };

        let acknowledgement = file
            .acknowledge_users
            .then(|| file.acknowledgement.unwrap_or_else(|| DEFAULT_ACKNOWLEDGEMENT.to_string()));

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            admin_chat_id: ChatId(file.admin_chat_id),
            cache,
            entry_ttl: Duration::from_secs(entry_ttl_secs),
            data_dir,
            error_chat_id: file.error_chat_id.map(ChatId),
            greeting: file.greeting.unwrap_or_else(|| DEFAULT_GREETING.to_string()),
            acknowledgement,
            failure_notice_prefix: file
                .failure_notice_prefix
                .unwrap_or_else(|| DEFAULT_FAILURE_NOTICE_PREFIX.to_string()),
        })
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            admin_chat_id: self.admin_chat_id.0,
            entry_ttl: self.entry_ttl,
            acknowledgement: self.acknowledgement.clone(),
            failure_notice_prefix: self.failure_notice_prefix.clone(),
        }
    }
}
