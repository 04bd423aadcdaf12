//! Message bus transports.
//!
//! A bus delivers `(routing_key, body)` pairs into the work queue. With MQTT
//! the topic is the routing key.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};
use crate::queue::QueueHandle;

/// A connected message bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Stop receiving and release the connection.
    async fn close(&self) -> Result<()>;

    /// Whether `close` has completed.
    fn is_closed(&self) -> bool;
}

// =============================================================================
// MQTT
// =============================================================================

/// Requests the client may queue before the event loop drains them.
const REQUEST_HEADROOM: usize = 10;

/// Request channel capacity for a client subscribing to `topics` topics.
///
/// Subscriptions are queued before the event loop is polled, so the channel
/// holds all of them plus room for later requests such as disconnect.
const fn request_capacity(topics: usize) -> usize {
    topics + REQUEST_HEADROOM
}

/// MQTT bus subscribed to a fixed set of topics.
pub struct MqttBus {
    client: AsyncClient,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MqttBus {
    /// Connect to a broker and forward every publish on `topics` to `queue`.
    ///
    /// The connection is retried in the background; this only fails if the
    /// subscriptions cannot be queued.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Bus` if a subscription request is rejected.
    pub async fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        topics: &[&str],
        queue: QueueHandle,
    ) -> Result<Self> {
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, request_capacity(topics.len()));

        for topic in topics {
            client
                .subscribe(*topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| MonitorError::Bus(format!("subscribe {topic}: {e}")))?;
        }
        tracing::info!(host = %host, port, topics = topics.len(), "Connecting to message bus");

        let listener = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        match String::from_utf8(p.payload.to_vec()) {
                            Ok(body) => queue.deliver(Some(p.topic), body),
                            Err(_) => {
                                tracing::warn!(topic = %p.topic, "Dropping non UTF-8 message");
                            }
                        }
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        tracing::info!("Connected to message bus");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Message bus connection error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            listener: Mutex::new(Some(listener)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "Disconnect request not sent");
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        tracing::info!("Message bus closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Local
// =============================================================================

/// In-process bus, used when no broker is configured.
///
/// Messages published here go straight to the work queue.
#[derive(Debug)]
pub struct LocalBus {
    queue: QueueHandle,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl LocalBus {
    /// Create a bus feeding `queue`.
    #[must_use]
    pub const fn new(queue: QueueHandle) -> Self {
        Self {
            queue,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Publish a message. Returns false once the bus is closed.
    pub fn publish(&self, routing_key: &str, body: impl Into<String>) -> bool {
        if self.is_closed() {
            tracing::debug!(routing_key = %routing_key, "Bus closed, dropping message");
            return false;
        }
        self.queue.deliver(Some(routing_key.to_string()), body);
        true
    }

    /// How many times `close` has been called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
