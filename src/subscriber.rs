//! Fan-out subscriber
//!
//! Holds a dedicated pub/sub connection whose background reader forwards
//! messages into a bounded in-memory queue; when the queue is full the
//! reader waits for `read()` to drain it. Pub/sub has no persistence, so
//! acking a delivery only updates the client's in-flight tracking.

use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{MqError, Result};

pub struct Subscriber {
    client: Client,
    channels: Vec<String>,
    rx: mpsc::Receiver<(String, Value)>,
    reader: JoinHandle<()>,
}

impl Subscriber {
    pub(crate) async fn build(
        client: Client,
        channels: &[&str],
        queue_len: usize,
    ) -> Result<Subscriber> {
        let mut pubsub = client.store().pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        debug!(channels = ?channels, "Subscribed");

        let (tx, rx) = mpsc::channel(queue_len.max(1));
        let reader = tokio::spawn(reader_loop(pubsub, tx));

        Ok(Subscriber {
            client,
            channels: channels.iter().map(|c| c.to_string()).collect(),
            rx,
            reader,
        })
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Returns the next queued delivery, waiting for one when the queue is
    /// empty
    pub async fn read(&mut self) -> Result<PubSubPayload> {
        self.client.ensure_ready()?;
        let (channel, message) = self
            .rx
            .recv()
            .await
            .ok_or_else(|| MqError::SubscriptionLost("pub/sub reader stopped".to_string()))?;
        Ok(PubSubPayload::new(self.client.clone(), channel, message))
    }

    /// Stops the reader and drops the pub/sub connection, releasing every
    /// channel subscription
    pub fn close(&self) {
        self.reader.abort();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("channels", &self.channels)
            .finish()
    }
}

async fn reader_loop(pubsub: redis::aio::PubSub, tx: mpsc::Sender<(String, Value)>) {
    let mut messages = pubsub.into_on_message();
    while let Some(msg) = messages.next().await {
        let channel = msg.get_channel_name().to_string();
        let value = match msg.get_payload::<String>() {
            // Non-JSON published text is delivered as a plain string value
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) => Value::String(text),
            },
            Err(e) => {
                warn!(channel = %channel, error = %e, "Undecodable pub/sub payload, dropping");
                continue;
            }
        };
        // Bounded queue: this send suspends until read() makes room
        if tx.send((channel, value)).await.is_err() {
            break;
        }
    }
    debug!("Subscriber reader stopped");
}

/// One pub/sub delivery. There is nothing to acknowledge on the backing
/// store; `ack` only marks the delivery complete for [`Client::close`].
pub struct PubSubPayload {
    client: Client,
    channel: String,
    message: Value,
    terminal: AtomicBool,
    track_id: u64,
}

impl PubSubPayload {
    fn new(client: Client, channel: String, message: Value) -> Self {
        let track_id = client.payload_active();
        Self {
            client,
            channel,
            message,
            terminal: AtomicBool::new(false),
            track_id,
        }
    }

    /// The channel this delivery arrived on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn message(&self) -> &Value {
        &self.message
    }

    pub fn ack(&self) -> Result<()> {
        if self.terminal.swap(true, Ordering::AcqRel) {
            return Err(MqError::AlreadyAcked);
        }
        self.client.payload_inactive(self.track_id);
        Ok(())
    }
}

impl Drop for PubSubPayload {
    fn drop(&mut self) {
        if !self.terminal.load(Ordering::Acquire) {
            self.client.payload_inactive(self.track_id);
        }
    }
}

impl std::fmt::Debug for PubSubPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubPayload")
            .field("channel", &self.channel)
            .field("message", &self.message)
            .finish()
    }
}
