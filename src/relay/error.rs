use std::fmt;

use crate::relay::cache::CacheError;
use crate::relay::transport::TransportError;

/// Why a single message could not be relayed.
///
/// Every variant is scoped to one message; none of them stops the bot.
#[derive(Debug)]
pub enum RelayError {
    /// A Telegram call failed.
    Transport(TransportError),
    /// The identity cache failed or held an unusable value.
    Cache(CacheError),
    /// No cached sender for the replied-to message (never stored or expired).
    SenderNotFound { fingerprint: String },
    /// The admin replied to something that is not a relayed user message.
    NotRelayed,
}

impl RelayError {
    /// Resolution failures mean the admin's reply has nowhere to go.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::SenderNotFound { .. } | Self::NotRelayed | Self::Cache(CacheError::InvalidValue { .. })
        )
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Cache(e) => write!(f, "identity cache: {}", e),
            Self::SenderNotFound { fingerprint } => {
                write!(f, "no sender cached for {:?} (expired or never stored)", fingerprint)
            }
            Self::NotRelayed => write!(f, "replied-to message is not a relayed user message"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Cache(e) => Some(e),
            Self::SenderNotFound { .. } | Self::NotRelayed => None,
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<CacheError> for RelayError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}
