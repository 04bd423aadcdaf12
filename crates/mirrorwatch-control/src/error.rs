//! Error types for endpoint lifecycle and synchronization.

use std::time::Duration;

use mirrorwatch_core::EndpointHash;
use mirrorwatch_store::EndpointState;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No endpoint matches the given name or hash.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The requested state transition is not valid.
    #[error(
        "invalid state transition for endpoint {hash}: cannot transition from {from:?} to {to:?}"
    )]
    InvalidState {
        /// The endpoint being transitioned.
        hash: EndpointHash,
        /// The current state.
        from: EndpointState,
        /// The requested target state.
        to: EndpointState,
    },

    /// Another endpoint already uses the requested name.
    #[error("endpoint name already in use: {0}")]
    NameInUse(String),

    /// The requested name has the form of an endpoint hash.
    #[error("endpoint name reserved: {0}")]
    ReservedName(String),

    /// A query expression could not be parsed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The SDN controller returned an error.
    #[error("controller error: {0}")]
    Controller(String),

    /// The SDN controller did not answer in time.
    #[error("controller did not respond within {0:?}")]
    ControllerTimeout(Duration),

    /// Switch configuration actuation failed.
    #[error("actuator error: {0}")]
    Actuator(#[from] mirrorwatch_actuator::ActuatorError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] mirrorwatch_store::StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::EndpointNotFound(_) => 404,
            Self::InvalidQuery(_) | Self::ReservedName(_) => 400,
            Self::InvalidState { .. } | Self::NameInUse(_) => 409,
            Self::Controller(_) | Self::ControllerTimeout(_) => 502,
            Self::Actuator(_) | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if the process must stop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Actuator(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Controller(_) | Self::ControllerTimeout(_) | Self::Store(_) => true,
            Self::Actuator(e) => e.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorwatch_actuator::ActuatorError;

    #[test]
    fn error_status_codes() {
        let hash = EndpointHash::from_bytes([1u8; 32]);

        assert_eq!(
            ControlError::EndpointNotFound("foo".into()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::InvalidQuery("x".into()).http_status_code(),
            400
        );
        assert_eq!(
            ControlError::ReservedName(hash.to_hex()).http_status_code(),
            400
        );
        assert_eq!(
            ControlError::InvalidState {
                hash,
                from: EndpointState::Ignored,
                to: EndpointState::Mirroring
            }
            .http_status_code(),
            409
        );
    }

    #[test]
    fn only_unavailable_config_is_fatal() {
        let fatal = ControlError::from(ActuatorError::ConfigUnavailable("empty".into()));
        assert!(fatal.is_fatal());

        let transient = ControlError::from(ActuatorError::Rpc("busy".into()));
        assert!(!transient.is_fatal());
        assert!(transient.is_retriable());

        assert!(!ControlError::Controller("down".into()).is_fatal());
    }
}
