//! Endpoint lifecycle and topology synchronization for mirrorwatch.
//!
//! This crate owns the endpoint registry. It turns controller topology polls,
//! decision-engine output and operator actions into endpoint state changes,
//! and drives switch mirroring so that at most a bounded number of endpoints
//! are investigated at once.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Monitor (bus + scheduler)                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncEngine                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  Reconcile  │ │  Decisions  │ │    Lifecycle        │   │
//! │  │  + Actions  │ │  + Queries  │ │    State Machine    │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌──────────┐                 ┌───────────────┐
//!        │  Store   │                 │ SdnController │
//!        │ (RocksDB)│                 │ (Faucet/REST) │
//!        └──────────┘                 └───────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirrorwatch_control::{resolve_controller, unix_now, ControlConfig, SyncEngine};
//! use mirrorwatch_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/mirrorwatch")?);
//! let config = ControlConfig::from_env();
//! let controller = resolve_controller(&config, None);
//!
//! let mut engine = SyncEngine::new(config, controller, Some(store));
//! engine.restore();
//! engine.refresh_topology(unix_now()).await?;
//!
//! for endpoint in engine.query("state mirroring")? {
//!     println!("{} on {}", endpoint.name, endpoint.data.segment);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! - `Unknown` → `Mirroring` (slot free) or `Queued` (no slot)
//! - `Queued` → `Mirroring` when a slot frees up
//! - `Mirroring` → `Known` (decision) or `Queued` (mirror timeout)
//! - `Known` → `Mirroring` (reinvestigation)
//! - any observed state → `Inactive` → its prior state when seen again
//! - any state but `Ignored` → `Ignored` → `Unknown`
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod classification;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod query;
pub mod sync;
pub mod types;

pub use classification::parse_classification;
pub use controller::{
    resolve_controller, AclRules, BcfController, FaucetController, NoopController, SdnController,
};
pub use error::{ControlError, Result};
pub use query::Filter;
pub use sync::{merge_addresses, record_history, SyncEngine};
pub use types::{
    unix_now, ControlConfig, ControllerKind, Machine, ReconcileReport, ReinvestigationReport,
};

// Re-export commonly used types from dependencies for convenience
pub use mirrorwatch_core::EndpointHash;
pub use mirrorwatch_store::{Endpoint, EndpointState};
