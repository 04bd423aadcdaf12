//! `RocksDB` storage layer for mirrorwatch.
//!
//! This crate persists the endpoint registry so that investigation state
//! survives restarts.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `endpoints`: Primary endpoint records, keyed by endpoint hash
//! - `endpoints_by_state`: Index for listing endpoints by lifecycle state
//!
//! # Example
//!
//! ```no_run
//! use mirrorwatch_store::{EndpointState, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/mirrorwatch-db").unwrap();
//! let mirroring = store.list_endpoints_by_state(EndpointState::Mirroring).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    ClassificationSnapshot, Endpoint, EndpointData, EndpointMetadata, EndpointState,
    SnapshotHistory, StateChange, Timestamp,
};

use mirrorwatch_core::EndpointHash;

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Insert or update an endpoint record.
    ///
    /// This also maintains the state index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Insert or update many endpoint records in one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_endpoints(&self, endpoints: &[Endpoint]) -> Result<()>;

    /// Get an endpoint by hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_endpoint(&self, hash: &EndpointHash) -> Result<Option<Endpoint>>;

    /// Delete an endpoint by hash.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EndpointNotFound` if the endpoint doesn't exist.
    fn delete_endpoint(&self, hash: &EndpointHash) -> Result<()>;

    /// List all endpoints currently in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_endpoints_by_state(&self, state: EndpointState) -> Result<Vec<Endpoint>>;

    /// List every endpoint in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_all_endpoints(&self) -> Result<Vec<Endpoint>>;
}
