//! The single work queue feeding the control loop.
//!
//! Bus callbacks, scheduler ticks and operator queries all enqueue here and
//! return immediately. Only the loop dequeues.

use std::time::Duration;

use mirrorwatch_control::Endpoint;
use tokio::sync::{mpsc, oneshot};

use crate::shutdown::StopSignal;

/// Periodic work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Poll the controller and reconcile.
    TopologyRefresh,
    /// Expire stale mirrors and start new investigations.
    Reinvestigate,
}

impl Job {
    /// Short label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TopologyRefresh => "topology_refresh",
            Self::Reinvestigate => "reinvestigate",
        }
    }
}

/// Reply channel for an operator query.
pub type QueryReply = oneshot::Sender<mirrorwatch_control::Result<Vec<Endpoint>>>;

/// One unit of work for the loop.
#[derive(Debug)]
pub enum WorkItem {
    /// A bus message as received.
    Bus {
        /// Routing key, if the transport supplied one.
        routing_key: Option<String>,
        /// Raw body.
        body: String,
    },
    /// A scheduled job.
    Job(Job),
    /// An endpoint query from the operator API.
    Query {
        /// Query expression.
        filter: String,
        /// Where to send the matching endpoints.
        reply: QueryReply,
    },
}

/// Producer side of the work queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl QueueHandle {
    /// Enqueue a bus message.
    pub fn deliver(&self, routing_key: Option<String>, body: impl Into<String>) {
        self.submit(WorkItem::Bus {
            routing_key,
            body: body.into(),
        });
    }

    /// Enqueue any work item. Returns false if the loop is gone.
    pub fn submit(&self, item: WorkItem) -> bool {
        if self.tx.send(item).is_err() {
            tracing::debug!("Work queue closed, dropping item");
            return false;
        }
        true
    }

    /// Ask the loop for endpoints matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidQuery` for a bad expression, or
    /// `ControlError::Internal` if the loop is not answering.
    pub async fn query(&self, filter: impl Into<String>) -> mirrorwatch_control::Result<Vec<Endpoint>> {
        let (reply, rx) = oneshot::channel();
        let item = WorkItem::Query {
            filter: filter.into(),
            reply,
        };
        if !self.submit(item) {
            return Err(mirrorwatch_control::ControlError::Internal(
                "control loop is not running".to_string(),
            ));
        }
        rx.await.map_err(|_| {
            mirrorwatch_control::ControlError::Internal("control loop dropped the query".to_string())
        })?
    }
}

/// Consumer side of the work queue.
#[derive(Debug)]
pub struct WorkQueue {
    rx: mpsc::UnboundedReceiver<WorkItem>,
    poll_timeout: Duration,
    stop: StopSignal,
}

/// Create a work queue.
#[must_use]
pub fn work_queue(poll_timeout: Duration, stop: StopSignal) -> (QueueHandle, WorkQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        QueueHandle { tx },
        WorkQueue {
            rx,
            poll_timeout,
            stop,
        },
    )
}

impl WorkQueue {
    /// Wait up to the poll timeout for the next item.
    ///
    /// Returns `None` if the stop flag is already set, and also when nothing
    /// arrives in time. An item received while stop is being requested is
    /// still returned; the next call observes the flag.
    pub async fn dequeue(&mut self) -> Option<WorkItem> {
        if self.stop.is_stopped() {
            return None;
        }
        tokio::time::timeout(self.poll_timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// The stop flag this queue observes.
    #[must_use]
    pub const fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(item: Option<WorkItem>) -> Option<String> {
        match item {
            Some(WorkItem::Bus { routing_key, .. }) => routing_key,
            _ => None,
        }
    }

    #[tokio::test]
    async fn dequeues_in_order() {
        let (handle, mut queue) = work_queue(Duration::from_millis(50), StopSignal::new());
        handle.deliver(Some("a".into()), "{}");
        handle.deliver(Some("b".into()), "{}");
        assert!(handle.submit(WorkItem::Job(Job::Reinvestigate)));

        assert_eq!(key(queue.dequeue().await).as_deref(), Some("a"));
        assert_eq!(key(queue.dequeue().await).as_deref(), Some("b"));
        assert!(matches!(
            queue.dequeue().await,
            Some(WorkItem::Job(Job::Reinvestigate))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_times_out() {
        let (_handle, mut queue) = work_queue(Duration::from_millis(100), StopSignal::new());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn nothing_after_stop() {
        let stop = StopSignal::new();
        let (handle, mut queue) = work_queue(Duration::from_millis(50), stop.clone());
        handle.deliver(Some("a".into()), "{}");
        stop.stop();
        assert!(queue.dequeue().await.is_none());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn item_received_during_stop_is_kept() {
        let stop = StopSignal::new();
        let (handle, mut queue) = work_queue(Duration::from_secs(5), stop.clone());

        let (item, ()) = tokio::join!(queue.dequeue(), async {
            tokio::task::yield_now().await;
            handle.deliver(Some("late".into()), "{}");
            stop.stop();
        });

        assert_eq!(key(item).as_deref(), Some("late"));
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn query_without_loop_fails() {
        let (handle, queue) = work_queue(Duration::from_millis(50), StopSignal::new());
        drop(queue);
        assert!(handle.query("all").await.is_err());
        assert!(!handle.submit(WorkItem::Job(Job::TopologyRefresh)));
    }
}
