//! Periodic job registration.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::queue::{Job, QueueHandle, WorkItem};
use crate::shutdown::StopSignal;

/// Registers periodic jobs. Each job only enqueues work; the loop runs it.
#[derive(Debug)]
pub struct JobScheduler {
    queue: QueueHandle,
    stop: StopSignal,
    handles: Vec<(Job, JoinHandle<()>)>,
}

impl JobScheduler {
    /// Create a scheduler with no jobs.
    #[must_use]
    pub const fn new(queue: QueueHandle, stop: StopSignal) -> Self {
        Self {
            queue,
            stop,
            handles: Vec::new(),
        }
    }

    /// Enqueue `job` every `period`, starting one period from now.
    pub fn every(&mut self, period: Duration, job: Job) {
        let queue = self.queue.clone();
        let stop = self.stop.clone();
        tracing::info!(job = job.label(), period_secs = period.as_secs(), "Scheduling job");

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if stop.is_stopped() || !queue.submit(WorkItem::Job(job)) {
                            break;
                        }
                    }
                    () = stop.wait() => break,
                }
            }
        });
        self.handles.push((job, handle));
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    /// Cancel every registered job. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.handles.len();
        for (job, handle) in self.handles.drain(..) {
            handle.abort();
            tracing::debug!(job = job.label(), "Cancelled job");
        }
        count
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
