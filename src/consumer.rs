//! Consumer for the message queue
//!
//! Group-scoped reader over one stream. Construction ensures the group
//! exists, scans the pending list, and may claim stale entries onto this
//! consumer; claimed entries are drained in backlog mode before the cursor
//! flips to live tailing.

use redis::streams::StreamId;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::ConsumerOptions;
use crate::error::Result;
use crate::payload::Payload;

/// Page size for the construction-time XPENDING scan
const PENDING_PAGE: usize = 100;

pub struct Consumer {
    client: Client,
    stream: String,
    group: String,
    name: String,
    /// `">"` in live mode, or the backlog position while draining
    latest_id: String,
    check_backlog: bool,
    block_ms: u64,
}

impl Consumer {
    pub(crate) async fn build(
        client: Client,
        stream: &str,
        group: &str,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Consumer> {
        client.store().ensure_group(stream, group).await?;

        let mut claimed = 0usize;
        if options.scan_pending_on_start {
            claimed = claim_stale(&client, stream, group, name, &options).await?;
        }

        // Anything claimed sits in our pending list; drain it before tailing.
        // Otherwise start live so fresh messages are not starved.
        let (latest_id, check_backlog) = if claimed > 0 {
            ("0-0".to_string(), true)
        } else {
            (">".to_string(), false)
        };
        debug!(
            stream = %stream,
            group = %group,
            consumer = %name,
            claimed = claimed,
            backlog = check_backlog,
            "Consumer ready"
        );

        Ok(Consumer {
            client,
            stream: stream.to_string(),
            group: group.to_string(),
            name: name.to_string(),
            latest_id,
            check_backlog,
            block_ms: options.block_ms,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the consumer is still draining claimed pending entries
    pub fn in_backlog(&self) -> bool {
        self.check_backlog
    }

    /// Reads the next message for this consumer. Blocks until one arrives;
    /// the bounded XREADGROUP block keeps cancellation latency under
    /// `block_ms`. Records whose `message` field does not decode are acked
    /// and dropped, never delivered.
    pub async fn read(&mut self) -> Result<Payload> {
        loop {
            self.client.ensure_ready()?;

            let id = if self.check_backlog {
                self.latest_id.clone()
            } else {
                ">".to_string()
            };
            let entries = self
                .client
                .store()
                .xread_group(&self.stream, &self.group, &self.name, &id, 1, self.block_ms)
                .await?;

            let Some(entry) = entries.into_iter().next() else {
                if self.check_backlog {
                    debug!(stream = %self.stream, group = %self.group, "Backlog drained, switching to live reads");
                    self.check_backlog = false;
                }
                // Live mode: the block timeout elapsed with nothing new
                continue;
            };

            if self.check_backlog {
                self.latest_id = entry.id.clone();
            }

            match parse_entry(&entry) {
                Ok(record) => {
                    debug!(stream = %self.stream, id = %entry.id, "Read message");
                    return Ok(Payload::new(
                        self.client.clone(),
                        &self.stream,
                        &self.group,
                        entry.id,
                        record.message,
                        record.response_channel,
                    ));
                }
                Err(reason) => {
                    warn!(stream = %self.stream, id = %entry.id, reason = %reason, "Dropping undecodable record");
                    self.client
                        .store()
                        .xack(&self.stream, &self.group, &entry.id)
                        .await?;
                }
            }
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("name", &self.name)
            .field("backlog", &self.check_backlog)
            .finish()
    }
}

/// Walks the pending list and claims entries idle past the threshold onto
/// `name`. Claims are best-effort; a failed claim is logged and skipped.
async fn claim_stale(
    client: &Client,
    stream: &str,
    group: &str,
    name: &str,
    options: &ConsumerOptions,
) -> Result<usize> {
    let mut claimed = 0usize;
    let mut start = "-".to_string();

    loop {
        let page = client
            .store()
            .xpending_page(stream, group, &start, PENDING_PAGE)
            .await?;
        let full_page = page.len() == PENDING_PAGE;

        for entry in &page {
            if (entry.last_delivered_ms as u64) < options.min_idle_ms {
                continue;
            }
            if !options.claim_stale_messages {
                debug!(id = %entry.id, owner = %entry.consumer, "Stale pending entry left unclaimed");
                continue;
            }
            match client
                .store()
                .xclaim(stream, group, name, options.min_idle_ms, &entry.id)
                .await
            {
                Ok(ids) if !ids.is_empty() => {
                    debug!(id = %entry.id, from = %entry.consumer, "Claimed pending entry");
                    claimed += 1;
                }
                // Someone else claimed or acked it between scan and claim
                Ok(_) => {}
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Failed to claim pending entry, skipping");
                }
            }
        }

        if !full_page {
            break;
        }
        match page.last() {
            // Exclusive range so the last-seen entry is not re-scanned
            Some(last) => start = format!("({}", last.id),
            None => break,
        }
    }

    Ok(claimed)
}

#[derive(Debug)]
struct ParsedRecord {
    message: Value,
    response_channel: Option<String>,
}

fn parse_entry(entry: &StreamId) -> std::result::Result<ParsedRecord, String> {
    let Some(text) = entry.get::<String>("message") else {
        return Err("record has no message field".to_string());
    };
    let message: Value =
        serde_json::from_str(&text).map_err(|e| format!("message field is not JSON: {e}"))?;
    Ok(ParsedRecord {
        message,
        response_channel: entry.get::<String>("response_channel"),
    })
}
