//! Producer for the message queue
//!
//! Appends records to one stream. A confirmed send overlays RPC semantics:
//! it allocates an ephemeral reply channel, subscribes to it before the
//! XADD so the reply cannot be lost, and blocks until the consumer
//! publishes a response (or the wait times out or is cancelled).

use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::ProducerOptions;
use crate::error::{MqError, Result};

pub struct Producer {
    client: Client,
    stream: String,
    /// INCR key backing the globally unique reply-channel ids
    channel_key: String,
    maxlen: usize,
    timeout: std::time::Duration,
    disposed: AtomicBool,
}

impl Producer {
    pub(crate) fn new(client: Client, stream: &str, options: ProducerOptions) -> Self {
        let channel_key = format!("{}:responseid", client.namespace());
        Self {
            client,
            stream: stream.to_string(),
            channel_key,
            maxlen: options.maxlen,
            timeout: options.timeout,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn ensure_usable(&self) -> Result<()> {
        self.client.ensure_ready()?;
        if self.disposed.load(Ordering::Acquire) {
            return Err(MqError::ProducerDisposed(self.stream.clone()));
        }
        Ok(())
    }

    /// Mints the next reply channel in the client namespace
    async fn unique_channel_id(&self) -> Result<String> {
        let uid = self.client.store().incr(&self.channel_key).await?;
        Ok(format!("{}:response.{}", self.client.namespace(), uid))
    }

    /// Appends a fire-and-forget record; returns the assigned stream id
    pub async fn add_unconfirmed_message(&self, message: &Value) -> Result<String> {
        self.ensure_usable()?;
        let encoded = serde_json::to_string(message)?;
        let fields = [("message", encoded)];
        let id = self
            .client
            .store()
            .xadd(&self.stream, self.maxlen, &fields)
            .await?;
        debug!(stream = %self.stream, id = %id, "Added unconfirmed message");
        Ok(id)
    }

    /// Appends an unconfirmed record that routes any eventual response to a
    /// caller-managed channel. The caller owns the subscription; nothing is
    /// awaited here.
    pub async fn add_unconfirmed_with_channel(
        &self,
        message: &Value,
        response_channel: &str,
    ) -> Result<String> {
        self.ensure_usable()?;
        let encoded = serde_json::to_string(message)?;
        let fields = [
            ("message", encoded),
            ("response_channel", response_channel.to_string()),
        ];
        let id = self
            .client
            .store()
            .xadd(&self.stream, self.maxlen, &fields)
            .await?;
        debug!(stream = %self.stream, id = %id, channel = %response_channel, "Added routed message");
        Ok(id)
    }

    /// Appends a record and blocks until a consumer publishes a reply on the
    /// allocated channel. Timeout, cancellation and undecodable replies are
    /// absorbed into normal reply objects rather than surfaced as errors.
    pub async fn add_confirmed_message(&self, message: &Value) -> Result<Value> {
        self.add_confirmed_message_with_cancel(message, &CancellationToken::new())
            .await
    }

    /// [`Producer::add_confirmed_message`] with cooperative cancellation.
    /// The reply channel is unsubscribed on every exit path.
    pub async fn add_confirmed_message_with_cancel(
        &self,
        message: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.ensure_usable()?;
        let encoded = serde_json::to_string(message)?;
        let channel = self.unique_channel_id().await?;
        debug!(stream = %self.stream, channel = %channel, "Confirmed send");

        // The subscription must be established before the XADD, or a fast
        // consumer could publish the reply into the void.
        let mut pubsub = self.client.store().pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let fields = [
            ("message", encoded),
            ("response_channel", channel.clone()),
        ];
        let added = self
            .client
            .store()
            .xadd(&self.stream, self.maxlen, &fields)
            .await;
        if let Err(e) = added {
            let _ = pubsub.unsubscribe(&channel).await;
            return Err(e);
        }

        let reply = {
            let mut messages = pubsub.on_message();
            tokio::select! {
                msg = messages.next() => match msg {
                    Some(msg) => match msg.get_payload::<String>() {
                        Ok(text) => Ok(decode_reply(&text)),
                        Err(e) => Ok(error_reply("JSON Decoding Error", &e.to_string())),
                    },
                    None => Err(MqError::SubscriptionLost(channel.clone())),
                },
                _ = tokio::time::sleep(self.timeout) => {
                    warn!(channel = %channel, timeout = ?self.timeout, "Confirmed send timed out");
                    Ok(error_reply(
                        "Timeout Error",
                        &format!("no reply on {} after {:?}", channel, self.timeout),
                    ))
                }
                _ = cancel.cancelled() => {
                    debug!(channel = %channel, "Confirmed send cancelled");
                    Ok(error_reply("Cancelled Error", "confirmed send cancelled by caller"))
                }
            }
        };

        // Release the ephemeral channel no matter how the wait ended
        let _ = pubsub.unsubscribe(&channel).await;
        reply
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("stream", &self.stream)
            .field("maxlen", &self.maxlen)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Parses a published reply, absorbing undecodable payloads
fn decode_reply(text: &str) -> Value {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => error_reply("JSON Decoding Error", &e.to_string()),
    }
}

fn error_reply(kind: &str, detail: &str) -> Value {
    json!({ "message": kind, "err": detail })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reply_valid_json() {
        let reply = decode_reply(r#"{"message": "I got your message", "error": null}"#);
        assert_eq!(reply["message"], "I got your message");
        assert!(reply["error"].is_null());
    }

    #[test]
    fn test_decode_reply_bad_json() {
        let reply = decode_reply("not json");
        assert_eq!(reply["message"], "JSON Decoding Error");
        assert!(reply["err"].is_string());
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = error_reply("Timeout Error", "no reply on rmq:response.7");
        assert_eq!(reply["message"], "Timeout Error");
        assert_eq!(reply["err"], "no reply on rmq:response.7");
    }
}
