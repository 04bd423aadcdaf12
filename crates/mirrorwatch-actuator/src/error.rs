//! Error types for configuration actuation.

use thiserror::Error;

/// A result type using `ActuatorError`.
pub type Result<T> = std::result::Result<T, ActuatorError>;

/// Errors that can occur while reading or writing switch configuration.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The configuration document is empty, missing, or unreadable.
    ///
    /// Acting on an unknown topology is unsafe, so callers must treat this as fatal.
    #[error("switch configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// Reading or writing the local configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The configuration RPC service rejected or failed a request.
    #[error("configuration RPC failed: {0}")]
    Rpc(String),

    /// The RPC client could not be constructed.
    #[error("invalid actuator settings: {0}")]
    InvalidSettings(String),
}

impl ActuatorError {
    /// Returns true if the process must stop rather than continue actuating.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigUnavailable(_))
    }

    /// Returns true if the operation can be retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ActuatorError::ConfigUnavailable("empty".into()).is_fatal());
        assert!(!ActuatorError::Rpc("timeout".into()).is_fatal());
        assert!(ActuatorError::Rpc("timeout".into()).is_retriable());
        assert!(!ActuatorError::Serialization("bad".into()).is_retriable());
    }
}
