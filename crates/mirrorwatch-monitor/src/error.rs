//! Error types for the monitor.

use mirrorwatch_control::ControlError;
use thiserror::Error;

/// A result type using `MonitorError`.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while running the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Endpoint synchronization failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Switch configuration actuator could not be set up.
    #[error("actuator error: {0}")]
    Actuator(#[from] mirrorwatch_actuator::ActuatorError),

    /// Storage could not be opened.
    #[error("storage error: {0}")]
    Store(#[from] mirrorwatch_store::StoreError),

    /// The message bus failed.
    #[error("bus error: {0}")]
    Bus(String),

    /// Metrics could not be registered or encoded.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// I/O error, e.g. binding the operator listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Returns true if the monitor must stop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Control(e) => e.is_fatal(),
            Self::Actuator(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<prometheus::Error> for MonitorError {
    fn from(e: prometheus::Error) -> Self {
        Self::Metrics(e.to_string())
    }
}
