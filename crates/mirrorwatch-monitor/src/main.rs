//! Mirrorwatch Monitor - SDN endpoint investigation service
//!
//! This is the main entry point for the monitor. It keeps the endpoint
//! registry in sync with the SDN controller, mirrors endpoints for
//! investigation and applies decision-engine and operator messages.
//!
//! # HTTP Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//! - `GET /v1/endpoints?filter=<expr>` - Query the endpoint registry
//! - `GET /metrics` - Prometheus metrics

use std::sync::Arc;

use mirrorwatch_control::{resolve_controller, SyncEngine};
use mirrorwatch_monitor::{
    http, keys, wait_for_signal, work_queue, AppState, Bus, Job, LocalBus, Metrics, Monitor,
    MonitorConfig, MqttBus, StopSignal, WorkItem,
};
use mirrorwatch_store::RocksStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mirrorwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Mirrorwatch Monitor");

    // Load configuration from environment
    let config = MonitorConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        controller = ?config.control.controller_kind,
        source = %config.control.expected_source,
        "Loaded monitor configuration"
    );

    // Storage is optional; without it the registry lives in memory
    let store = match RocksStore::open(&config.data_dir) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open endpoint store, continuing in memory");
            None
        }
    };

    let actuator = config.actuator()?;
    let controller = resolve_controller(&config.control, actuator);
    let mut engine = SyncEngine::new(config.control.clone(), controller, store);
    let restored = engine.restore();
    tracing::info!(restored, "Restored endpoint registry");

    let stop = StopSignal::new();
    let (handle, queue) = work_queue(config.poll_timeout, stop.clone());

    let bus: Arc<dyn Bus> = if let Some(host) = &config.bus_host {
        Arc::new(
            MqttBus::connect(
                host,
                config.bus_port,
                &config.bus_client_id,
                &keys::ALL,
                handle.clone(),
            )
            .await?,
        )
    } else {
        tracing::warn!("BUS_HOST not set, running without a message bus");
        Arc::new(LocalBus::new(handle.clone()))
    };

    let metrics = Metrics::new()?;
    let mut monitor = Monitor::new(engine, bus, metrics.clone(), handle.clone(), queue);
    monitor.schedule(
        config.scan_frequency,
        config.control.reinvestigation_frequency,
    );
    handle.submit(WorkItem::Job(Job::TopologyRefresh));

    // Operator API
    let state = AppState {
        queue: handle,
        metrics,
        status: monitor.status(),
    };
    let listen_addr = config.listen_addr.clone();
    let server_stop = stop.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = http::serve(&listen_addr, state, server_stop).await {
            tracing::error!(error = %e, "Operator API failed");
        }
    });

    // Signals only set the stop flag; the loop notices at its next dequeue
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_signal() => signal_stop.stop(),
            () = signal_stop.wait() => {}
        }
    });

    let outcome = monitor.run().await;
    let report = monitor.shutdown().await;
    tracing::info!(
        cancelled_jobs = report.cancelled_jobs,
        bus_closed = report.bus_closed,
        persisted = report.persisted,
        "Mirrorwatch Monitor stopped"
    );
    if let Err(e) = server.await {
        tracing::warn!(error = %e, "Operator API task did not finish cleanly");
    }

    outcome?;
    Ok(())
}
