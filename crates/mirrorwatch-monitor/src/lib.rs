//! Control loop, message bus and operator API for mirrorwatch.
//!
//! This crate wires the endpoint registry to the outside world:
//!
//! - MQTT bus subscription with routing-key classification
//! - A single work queue drained by one control loop task
//! - Periodic topology refresh and reinvestigation jobs
//! - Prometheus metrics and a small operator HTTP surface
//! - Signal-driven shutdown that cancels jobs and closes the bus once
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │  MQTT Bus  │  │ Scheduler  │  │ Operator   │
//! │ (rumqttc)  │  │  (jobs)    │  │ API (axum) │
//! └────────────┘  └────────────┘  └────────────┘
//!        │              │               │
//!        └──────────────┼───────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkQueue                             │
//! └─────────────────────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Monitor (control loop)                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  classify   │ │  dispatch   │ │    SyncEngine       │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirrorwatch_control::{resolve_controller, ControlConfig, SyncEngine};
//! use mirrorwatch_monitor::{work_queue, LocalBus, Metrics, Monitor, StopSignal};
//! use mirrorwatch_store::RocksStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/mirrorwatch")?);
//! let config = ControlConfig::from_env();
//! let engine = SyncEngine::new(config.clone(), resolve_controller(&config, None), Some(store));
//!
//! let (handle, queue) = work_queue(Duration::from_secs(1), StopSignal::new());
//! let bus = Arc::new(LocalBus::new(handle.clone()));
//! let mut monitor = Monitor::new(engine, bus, Metrics::new()?, handle, queue);
//! monitor.schedule(Duration::from_secs(5), config.reinvestigation_frequency);
//!
//! monitor.run().await?;
//! let report = monitor.shutdown().await;
//! println!("cancelled {} jobs", report.cancelled_jobs);
//! # Ok(())
//! # }
//! ```
//!
//! # Loop States
//!
//! - `Running` → `Draining` when the stop flag is set or a fatal error occurs
//! - `Draining` → `Stopped` once jobs are cancelled, the bus is closed and
//!   the registry is persisted

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod message;
pub mod metrics;
pub mod monitor;
pub mod queue;
pub mod shutdown;

pub use bus::{Bus, LocalBus, MqttBus};
pub use config::{ActuatorMode, MonitorConfig};
pub use error::{MonitorError, Result};
pub use http::{router, AppState};
pub use jobs::JobScheduler;
pub use message::{classify, keys, MessageKind};
pub use metrics::Metrics;
pub use monitor::{LoopState, LoopStatus, Monitor, ShutdownReport};
pub use queue::{work_queue, Job, QueueHandle, WorkItem, WorkQueue};
pub use shutdown::{wait_for_signal, StopSignal};
