//! The control loop.
//!
//! One task owns the [`SyncEngine`] and drains the work queue. Bus messages,
//! scheduled jobs and operator queries are all handled here in arrival order.

use std::sync::Arc;
use std::time::Duration;

use mirrorwatch_control::{unix_now, SyncEngine};
use mirrorwatch_store::{Store, Timestamp};
use parking_lot::RwLock;

use crate::bus::Bus;
use crate::error::Result;
use crate::jobs::JobScheduler;
use crate::message::{classify, MessageKind};
use crate::metrics::Metrics;
use crate::queue::{Job, QueueHandle, WorkItem, WorkQueue};
use crate::shutdown::StopSignal;

/// Control loop lifetime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Draining the work queue.
    #[default]
    Running,
    /// Stop requested, cleanup in progress.
    Draining,
    /// Cleanup finished.
    Stopped,
}

/// Shared view of the loop state.
#[derive(Debug, Clone, Default)]
pub struct LoopStatus(Arc<RwLock<LoopState>>);

impl LoopStatus {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> LoopState {
        *self.0.read()
    }

    /// Replace the state.
    pub fn set(&self, state: LoopState) {
        *self.0.write() = state;
    }
}

/// What shutdown did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Scheduled jobs cancelled.
    pub cancelled_jobs: usize,
    /// Whether the bus closed cleanly.
    pub bus_closed: bool,
    /// Whether the registry reached the store.
    pub persisted: bool,
    /// Work items handled over the loop's lifetime.
    pub processed: u64,
}

/// The control loop and everything it owns.
pub struct Monitor<S: Store> {
    engine: SyncEngine<S>,
    bus: Arc<dyn Bus>,
    metrics: Metrics,
    stop: StopSignal,
    queue: WorkQueue,
    scheduler: JobScheduler,
    status: LoopStatus,
    processed: u64,
    report: Option<ShutdownReport>,
}

impl<S: Store> Monitor<S> {
    /// Assemble a loop around an engine and its queue.
    #[must_use]
    pub fn new(
        engine: SyncEngine<S>,
        bus: Arc<dyn Bus>,
        metrics: Metrics,
        handle: QueueHandle,
        queue: WorkQueue,
    ) -> Self {
        let stop = queue.stop_signal().clone();
        metrics.update_endpoints(&engine.state_counts());
        Self {
            engine,
            bus,
            metrics,
            scheduler: JobScheduler::new(handle, stop.clone()),
            stop,
            queue,
            status: LoopStatus::default(),
            processed: 0,
            report: None,
        }
    }

    /// The registry.
    #[must_use]
    pub const fn engine(&self) -> &SyncEngine<S> {
        &self.engine
    }

    /// Shared loop state, for readiness reporting.
    #[must_use]
    pub fn status(&self) -> LoopStatus {
        self.status.clone()
    }

    /// The stop flag.
    #[must_use]
    pub const fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Register the periodic topology refresh and reinvestigation jobs.
    pub fn schedule(&mut self, scan: Duration, reinvestigate: Duration) {
        self.scheduler.every(scan, Job::TopologyRefresh);
        self.scheduler.every(reinvestigate, Job::Reinvestigate);
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.scheduler.job_count()
    }

    /// Drain the queue until the stop flag is set.
    ///
    /// Non-fatal errors are logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, after setting the stop flag.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(endpoints = self.engine.len(), "Control loop running");
        loop {
            let Some(item) = self.queue.dequeue().await else {
                if self.stop.is_stopped() {
                    break;
                }
                continue;
            };
            if let Err(e) = self.process(item).await {
                if e.is_fatal() {
                    tracing::error!(error = %e, "Fatal error, stopping control loop");
                    self.stop.stop();
                    return Err(e);
                }
                tracing::warn!(error = %e, "Work item failed");
            }
        }
        tracing::info!(processed = self.processed, "Control loop stopped");
        Ok(())
    }

    /// Handle one work item.
    ///
    /// # Errors
    ///
    /// Returns the handler's error.
    pub async fn process(&mut self, item: WorkItem) -> Result<()> {
        self.processed += 1;
        match item {
            WorkItem::Bus { routing_key, body } => {
                let Some(kind) = classify(routing_key.as_deref(), &body) else {
                    tracing::warn!(body_len = body.len(), "Dropping message without routing key");
                    return Ok(());
                };
                self.dispatch(kind).await
            }
            WorkItem::Job(job) => self.run_job(job).await,
            WorkItem::Query { filter, reply } => {
                let result = self
                    .engine
                    .query(&filter)
                    .map(|found| found.into_iter().cloned().collect());
                if reply.send(result).is_err() {
                    tracing::debug!(filter = %filter, "Query caller went away");
                }
                Ok(())
            }
        }
    }

    /// Apply one classified message.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn dispatch(&mut self, kind: MessageKind) -> Result<()> {
        let label = kind.label();
        let mutates = kind.mutates_registry();
        self.metrics.record_message(label);
        let now = unix_now();

        let result = match kind {
            MessageKind::Decision(decisions) => self
                .engine
                .apply_decisions(&decisions, now)
                .await
                .map(|applied| tracing::debug!(applied, "Applied decisions")),
            MessageKind::ControllerEvent(event) => {
                self.engine.record_controller_event(event);
                Ok(())
            }
            MessageKind::Ignore(targets) => self.engine.ignore(&targets, now).await.map(drop),
            MessageKind::ClearIgnored(targets) => {
                self.engine.clear_ignored(&targets, now).await.map(drop)
            }
            MessageKind::Remove(targets) => self.engine.remove(&targets).await.map(drop),
            MessageKind::RemoveIgnored => self.engine.remove_ignored().await.map(drop),
            MessageKind::RemoveInactives => self.engine.remove_inactives().await.map(drop),
            MessageKind::UpdateAcls(rules) => self.engine.update_acls(&rules).await,
            MessageKind::RoleChange(changes) => {
                self.engine.change_roles(&changes);
                Ok(())
            }
            MessageKind::Unrecognized(key) => {
                tracing::debug!(routing_key = %key, "Ignoring message with unhandled routing key");
                Ok(())
            }
        };

        if mutates {
            self.after_mutation();
        }
        result.map_err(Into::into)
    }

    async fn run_job(&mut self, job: Job) -> Result<()> {
        let now = unix_now();
        tracing::debug!(job = job.label(), "Running job");
        let result = match job {
            Job::TopologyRefresh => self.refresh(now).await,
            Job::Reinvestigate => self.engine.reinvestigate(now).await.map(drop),
        };
        self.after_mutation();
        result.map_err(Into::into)
    }

    async fn refresh(&mut self, now: Timestamp) -> mirrorwatch_control::Result<()> {
        let machines = self.engine.poll_machines().await?;
        self.metrics.update_metrics(&machines);
        let report = self.engine.reconcile(&machines, now).await?;
        let started = self.engine.investigate(now).await?;
        tracing::debug!(
            machines = machines.len(),
            created = report.created,
            deactivated = report.deactivated,
            started = started.started,
            "Topology refreshed"
        );
        Ok(())
    }

    fn after_mutation(&self) {
        self.engine.persist();
        self.metrics.update_endpoints(&self.engine.state_counts());
    }

    /// Cancel jobs, close the bus and persist the registry.
    ///
    /// Runs once; later calls return the first report.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if let Some(report) = self.report {
            return report;
        }
        self.status.set(LoopState::Draining);
        self.stop.stop();

        let cancelled_jobs = self.scheduler.cancel_all();
        let bus_closed = match self.bus.close().await {
            Ok(()) => self.bus.is_closed(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to close message bus");
                false
            }
        };
        let persisted = self.engine.persist();

        let report = ShutdownReport {
            cancelled_jobs,
            bus_closed,
            persisted,
            processed: self.processed,
        };
        tracing::info!(
            cancelled_jobs,
            bus_closed,
            persisted,
            processed = self.processed,
            "Shutdown complete"
        );
        self.status.set(LoopState::Stopped);
        self.report = Some(report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::message::keys;
    use crate::queue::work_queue;
    use mirrorwatch_control::controller::mock::MockController;
    use mirrorwatch_control::{ControlConfig, EndpointState, Machine};
    use mirrorwatch_store::RocksStore;
    use tempfile::TempDir;

    struct Harness {
        monitor: Monitor<RocksStore>,
        bus: Arc<LocalBus>,
        controller: Arc<MockController>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let controller = Arc::new(MockController::new());
        let engine = SyncEngine::new(ControlConfig::default(), controller.clone(), Some(store));

        let (handle, queue) = work_queue(Duration::from_millis(20), StopSignal::new());
        let bus = Arc::new(LocalBus::new(handle.clone()));
        let monitor = Monitor::new(engine, bus.clone(), Metrics::new().unwrap(), handle, queue);
        Harness {
            monitor,
            bus,
            controller,
            _dir: dir,
        }
    }

    fn machine(mac: &str) -> Machine {
        Machine {
            active: true,
            source: "mirrorwatch".into(),
            mac: mac.into(),
            tenant: Some("VLAN100".into()),
            port: Some("1".into()),
            segment: "switch1".into(),
            ipv4: Some("10.0.0.1".into()),
            ..Machine::default()
        }
    }

    #[tokio::test]
    async fn refresh_job_starts_mirroring() {
        let mut h = harness();
        h.controller.set_machines(vec![machine("00:00:00:00:00:01")]);

        h.monitor.process(WorkItem::Job(Job::TopologyRefresh)).await.unwrap();

        let counts = h.monitor.engine().state_counts();
        assert_eq!(counts[&EndpointState::Mirroring], 1);
        assert_eq!(h.controller.mirrored().len(), 1);
    }

    #[tokio::test]
    async fn messages_without_key_are_dropped() {
        let mut h = harness();
        let item = WorkItem::Bus {
            routing_key: None,
            body: "{}".into(),
        };
        h.monitor.process(item).await.unwrap();
        assert_eq!(h.monitor.metrics.message_count("unrecognized"), 0);
    }

    #[tokio::test]
    async fn role_change_persists() {
        let mut h = harness();
        h.controller.set_machines(vec![machine("00:00:00:00:00:01")]);
        h.monitor.process(WorkItem::Job(Job::TopologyRefresh)).await.unwrap();
        let name = h.monitor.engine().endpoints().next().unwrap().name.clone();

        let body = serde_json::json!([[name.clone(), "printer"]]).to_string();
        h.monitor
            .process(WorkItem::Bus {
                routing_key: Some(keys::ROLE_CHANGE.into()),
                body,
            })
            .await
            .unwrap();

        let endpoint = h.monitor.engine().endpoint_by_name(&name).unwrap();
        assert_eq!(endpoint.data.role.as_deref(), Some("printer"));
        assert_eq!(h.monitor.metrics.message_count("role_change"), 1);
    }

    #[tokio::test]
    async fn shutdown_runs_once() {
        let mut h = harness();
        h.monitor.schedule(Duration::from_secs(5), Duration::from_secs(900));
        assert_eq!(h.monitor.job_count(), 2);

        let first = h.monitor.shutdown().await;
        assert_eq!(first.cancelled_jobs, 2);
        assert!(first.bus_closed);
        assert!(first.persisted);
        assert_eq!(h.monitor.status().get(), LoopState::Stopped);

        let second = h.monitor.shutdown().await;
        assert_eq!(second, first);
        assert_eq!(h.bus.close_calls(), 1);
    }

    #[tokio::test]
    async fn run_exits_on_stop() {
        let mut h = harness();
        assert!(h.bus.publish(keys::REMOVE_IGNORED, "{}"));
        let stop = h.monitor.stop_signal().clone();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.stop();
        });
        h.monitor.run().await.unwrap();
        stopper.await.unwrap();

        assert_eq!(h.monitor.metrics.message_count("remove_ignored"), 1);
    }
}
