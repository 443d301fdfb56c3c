//! Fan-out publisher
//!
//! Delivers one copy of a message to each distinct channel in the union of
//! the constructor channels and any per-call extras. Channels with no
//! subscribers are skipped after a PUBSUB NUMSUB probe.

use serde_json::Value;
use tracing::debug;

use crate::client::Client;
use crate::error::Result;

pub struct Publisher {
    client: Client,
    channels: Vec<String>,
}

impl Publisher {
    pub(crate) fn new(client: Client, channels: &[&str]) -> Self {
        Self {
            client,
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Publishes `message` once per distinct channel that has at least one
    /// subscriber; returns how many channels received it
    pub async fn publish(&self, message: &Value, extra_channels: &[&str]) -> Result<usize> {
        self.client.ensure_ready()?;
        let payload = serde_json::to_string(message)?;
        let targets = channel_union(&self.channels, extra_channels);

        let numsub = self.client.store().pubsub_numsub(&targets).await?;
        let mut published = 0usize;
        for channel in &targets {
            let subscribers = numsub.get(channel).copied().unwrap_or(0);
            if subscribers == 0 {
                debug!(channel = %channel, "No subscribers, skipping");
                continue;
            }
            self.client.store().publish(channel, &payload).await?;
            debug!(channel = %channel, subscribers = subscribers, "Published");
            published += 1;
        }
        Ok(published)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("channels", &self.channels)
            .finish()
    }
}

/// Order-preserving distinct union of default and extra channels
fn channel_union(channels: &[String], extras: &[&str]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    channels
        .iter()
        .map(String::as_str)
        .chain(extras.iter().copied())
        .filter(|c| seen.insert(c.to_string()))
        .map(|c| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_union_dedups() {
        let defaults = vec!["topic1".to_string(), "topic2".to_string()];
        let union = channel_union(&defaults, &["topic2", "topic3"]);
        assert_eq!(union, vec!["topic1", "topic2", "topic3"]);
    }

    #[test]
    fn test_channel_union_empty_defaults() {
        let union = channel_union(&[], &["topic1", "topic1"]);
        assert_eq!(union, vec!["topic1"]);
    }
}
