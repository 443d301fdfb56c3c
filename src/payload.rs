//! Per-message handle for stream consumers
//!
//! Couples response publication to the stream acknowledgment: the XACK
//! always completes before the reply PUBLISH, so a reply receiver can never
//! observe a message that still looks pending.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::client::Client;
use crate::error::{MqError, Result};

pub struct Payload {
    client: Client,
    stream: String,
    group: String,
    msg_id: String,
    message: Value,
    response_channel: Option<String>,
    terminal: AtomicBool,
    track_id: u64,
}

impl Payload {
    pub(crate) fn new(
        client: Client,
        stream: &str,
        group: &str,
        msg_id: String,
        message: Value,
        response_channel: Option<String>,
    ) -> Self {
        let track_id = client.payload_active();
        Self {
            client,
            stream: stream.to_string(),
            group: group.to_string(),
            msg_id,
            message,
            response_channel,
            terminal: AtomicBool::new(false),
            track_id,
        }
    }

    /// The decoded application message
    pub fn message(&self) -> &Value {
        &self.message
    }

    /// The backing-store id of this message
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    /// Set when the producer is waiting for a confirmed reply
    pub fn response_channel(&self) -> Option<&str> {
        self.response_channel.as_deref()
    }

    /// Acknowledges the message and, when a reply channel is set, publishes
    /// `{"message": response, "error": null}` on it
    pub async fn ack(&self, response: Option<Value>) -> Result<()> {
        self.terminate(response, None).await
    }

    /// Acknowledges the message and surfaces `error` on the reply channel,
    /// if any. On the stream this is indistinguishable from an ack.
    pub async fn nack(&self, error: &str) -> Result<()> {
        self.terminate(None, Some(error.to_string())).await
    }

    async fn terminate(&self, response: Option<Value>, error: Option<String>) -> Result<()> {
        self.client.ensure_not_closed()?;
        if self.terminal.swap(true, Ordering::AcqRel) {
            return Err(MqError::AlreadyAcked);
        }

        let acked = self
            .client
            .store()
            .xack(&self.stream, &self.group, &self.msg_id)
            .await;
        if let Err(e) = acked {
            // Not acknowledged; the payload may be retried
            self.terminal.store(false, Ordering::Release);
            return Err(e);
        }

        let published = self.publish_reply(response, error).await;
        self.client.payload_inactive(self.track_id);
        debug!(stream = %self.stream, id = %self.msg_id, "Payload terminal");
        published
    }

    async fn publish_reply(&self, response: Option<Value>, error: Option<String>) -> Result<()> {
        let Some(channel) = &self.response_channel else {
            return Ok(());
        };
        let reply = reply_object(response, error);
        self.client
            .store()
            .publish(channel, &serde_json::to_string(&reply)?)
            .await
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        // A leaked handle must not wedge close(); the entry itself stays
        // pending on the stream, eligible for reclamation.
        if !self.terminal.load(Ordering::Acquire) {
            self.client.payload_inactive(self.track_id);
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("stream", &self.stream)
            .field("msg_id", &self.msg_id)
            .field("response_channel", &self.response_channel)
            .finish()
    }
}

fn reply_object(response: Option<Value>, error: Option<String>) -> Value {
    json!({
        "message": response.unwrap_or(Value::Null),
        "error": error.map(Value::String).unwrap_or(Value::Null),
    })
}
