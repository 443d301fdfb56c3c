//! Client for the message queue
//!
//! Owns the backing-store connections, the producer registry, and the set of
//! in-flight payloads. Producers, consumers, publishers and subscribers all
//! borrow their connections from here.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::{Config, ConsumerOptions, ProducerOptions};
use crate::consumer::Consumer;
use crate::error::{MqError, Result};
use crate::producer::Producer;
use crate::publisher::Publisher;
use crate::store::Store;
use crate::subscriber::Subscriber;

/// Connection lifecycle of a [`Client`]; transitions are one-way.
/// Construction and connection are fused, so a client is first observable
/// in `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Ready,
    Closing,
    Closed,
}

/// Tracks in-flight payloads and signals when none remain. The set is the
/// single source of truth; the notify fires under the same lock that
/// empties it, so a waiter can never observe a stale emptiness.
struct PayloadTracker {
    active: Mutex<HashSet<u64>>,
    seq: AtomicU64,
    idle: Notify,
}

impl PayloadTracker {
    fn new() -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
            seq: AtomicU64::new(1),
            idle: Notify::new(),
        }
    }

    fn activate(&self) -> u64 {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(id);
        id
    }

    fn deactivate(&self, id: u64) {
        let mut active = self.active.lock();
        // A payload can reach here twice (ack then drop); only the first wins
        if active.remove(&id) && active.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn count(&self) -> usize {
        self.active.lock().len()
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register interest before inspecting the set: a deactivate that
            // empties it after our check must find this waiter registered
            notified.as_mut().enable();
            if self.active.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

struct ClientInner {
    store: Store,
    config: Config,
    status: Mutex<Status>,
    producers: Mutex<HashMap<String, Arc<Producer>>>,
    payloads: PayloadTracker,
}

/// Cheap-clone handle to one message-queue connection
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connects to the backing store at `url` and verifies it with PING.
    /// `namespace` prefixes reply channels and the reply-id counter;
    /// defaults to `"rmq"`.
    pub async fn connect(url: &str, namespace: Option<&str>) -> Result<Client> {
        let mut config = Config::default();
        config.redis_url = url.to_string();
        if let Some(ns) = namespace {
            config.namespace = ns.to_string();
        }
        Self::connect_with_config(config).await
    }

    /// Connects using a full [`Config`] (see [`Config::load`] for the
    /// environment-driven variant)
    pub async fn connect_with_config(config: Config) -> Result<Client> {
        debug!(url = %config.redis_url, namespace = %config.namespace, "Connecting");
        let store = Store::connect(&config.redis_url).await?;

        let client = Client {
            inner: Arc::new(ClientInner {
                store,
                config,
                status: Mutex::new(Status::Connecting),
                producers: Mutex::new(HashMap::new()),
                payloads: PayloadTracker::new(),
            }),
        };
        *client.inner.status.lock() = Status::Ready;
        Ok(client)
    }

    pub fn status(&self) -> Status {
        *self.inner.status.lock()
    }

    pub fn namespace(&self) -> &str {
        &self.inner.config.namespace
    }

    /// Number of payloads delivered but not yet acked or nacked
    pub fn in_flight(&self) -> usize {
        self.inner.payloads.count()
    }

    pub(crate) fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Gate for operations that start new work (reads, sends)
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        let status = self.status();
        if status == Status::Ready {
            Ok(())
        } else {
            Err(MqError::NotReady(status))
        }
    }

    /// Gate for completing work already in flight; acks are still allowed
    /// while the client drains during close()
    pub(crate) fn ensure_not_closed(&self) -> Result<()> {
        let status = self.status();
        match status {
            Status::Ready | Status::Closing => Ok(()),
            _ => Err(MqError::NotReady(status)),
        }
    }

    pub(crate) fn payload_active(&self) -> u64 {
        self.inner.payloads.activate()
    }

    pub(crate) fn payload_inactive(&self, id: u64) {
        self.inner.payloads.deactivate(id);
    }

    /// Returns the producer for `stream`, constructing it on first use.
    /// Idempotent by stream name: two calls return the identical producer.
    pub fn producer(&self, stream: &str) -> Result<Arc<Producer>> {
        self.producer_with(stream, self.inner.config.producer_options())
    }

    /// Like [`Client::producer`] with explicit options. Options are only
    /// applied when the producer is first constructed.
    pub fn producer_with(&self, stream: &str, options: ProducerOptions) -> Result<Arc<Producer>> {
        self.ensure_ready()?;
        let mut registry = self.inner.producers.lock();
        if let Some(existing) = registry.get(stream) {
            debug!(stream = %stream, "Returning registered producer");
            return Ok(existing.clone());
        }
        let producer = Arc::new(Producer::new(self.clone(), stream, options));
        registry.insert(stream.to_string(), producer.clone());
        debug!(stream = %stream, "Registered producer");
        Ok(producer)
    }

    /// Removes `producer` from the registry and marks it disposed
    pub fn dispose_producer(&self, producer: &Arc<Producer>) -> Result<()> {
        let mut registry = self.inner.producers.lock();
        match registry.get(producer.stream()) {
            Some(registered) if Arc::ptr_eq(registered, producer) => {
                registry.remove(producer.stream());
            }
            _ => {
                return Err(MqError::RegistryMismatch(producer.stream().to_string()));
            }
        }
        drop(registry);
        producer.mark_disposed();
        debug!(stream = %producer.stream(), "Disposed producer");
        Ok(())
    }

    /// Builds a consumer named `name` in `group` on `stream`, creating the
    /// group when absent and reclaiming stale pending entries
    pub async fn consumer(&self, stream: &str, group: &str, name: &str) -> Result<Consumer> {
        self.consumer_with(stream, group, name, self.inner.config.consumer_options())
            .await
    }

    /// Like [`Client::consumer`] with explicit options
    pub async fn consumer_with(
        &self,
        stream: &str,
        group: &str,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Consumer> {
        self.ensure_ready()?;
        Consumer::build(self.clone(), stream, group, name, options).await
    }

    /// Fan-out publisher over `channels` (plus per-call extras)
    pub fn publisher(&self, channels: &[&str]) -> Publisher {
        Publisher::new(self.clone(), channels)
    }

    /// Fan-out subscriber on `channels`, delivering through a bounded queue
    pub async fn subscriber(&self, channels: &[&str]) -> Result<Subscriber> {
        self.ensure_ready()?;
        Subscriber::build(self.clone(), channels, self.inner.config.subscriber_queue_len).await
    }

    /// Waits for every in-flight payload to reach ack/nack, then shuts the
    /// client down. A second call is an error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut status = self.inner.status.lock();
            match *status {
                Status::Closing | Status::Closed => return Err(MqError::AlreadyClosed),
                _ => *status = Status::Closing,
            }
        }

        let pending = self.in_flight();
        if pending > 0 {
            info!(in_flight = pending, "Waiting for in-flight payloads");
        }
        self.inner.payloads.wait_idle().await;

        let mut registry = self.inner.producers.lock();
        for producer in registry.values() {
            producer.mark_disposed();
        }
        registry.clear();
        drop(registry);

        *self.inner.status.lock() = Status::Closed;
        info!("Client closed");
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.inner.config.namespace)
            .field("status", &self.status())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
