//! Storage errors.

use mirrorwatch_core::EndpointHash;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by an endpoint store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing is stored under this hash.
    #[error("endpoint not stored: {0}")]
    EndpointNotFound(EndpointHash),

    /// `RocksDB` rejected the operation.
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// The database was opened without a required column family.
    #[error("column family missing: {0}")]
    MissingColumnFamily(String),

    /// An endpoint could not be encoded.
    #[error("cannot encode endpoint: {0}")]
    Encode(String),

    /// A stored record could not be decoded.
    #[error("cannot decode stored endpoint: {0}")]
    Decode(String),
}

impl StoreError {
    /// Returns true if the error only means the record is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EndpointNotFound(_))
    }
}
