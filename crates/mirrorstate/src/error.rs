//! Error types for the state synchronization layer.

use thiserror::Error;

/// Errors that can occur while syncing state with a persistent backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A stored value could not be parsed back into a JSON value.
    #[error("Malformed value stored under '{key}': {reason}")]
    MalformedValue {
        /// Key whose stored text failed to parse.
        key: String,
        /// Parser message.
        reason: String,
    },

    /// No persistent backend matching the configured preference is reachable.
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A raw backend operation failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A string key does not name any declared config key.
    #[error("Unknown config key '{0}'")]
    UnknownKey(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A typed value could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for state synchronization operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a malformed value error for `key`.
    pub fn malformed<K: Into<String>, S: ToString>(key: K, reason: S) -> Self {
        Self::MalformedValue {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a generic backend error.
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether startup should abort on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Config(_))
    }
}

/// Convert serde_json errors to our error type.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Convert TOML parse errors to our error type.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
