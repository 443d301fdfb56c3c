//! Configuration for the message queue

use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Backing store
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,

    // Producer
    #[serde(default = "default_maxlen")]
    pub producer_maxlen: usize,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_ms: u64,

    // Consumer
    #[serde(default = "default_scan_pending")]
    pub scan_pending_on_start: bool,
    #[serde(default = "default_claim_stale")]
    pub claim_stale_messages: bool,
    #[serde(default = "default_min_idle")]
    pub min_idle_ms: u64,
    #[serde(default = "default_block")]
    pub block_ms: u64,

    // Pub/sub
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue_len: usize,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    "rmq".to_string()
}

fn default_maxlen() -> usize {
    100
}

fn default_confirm_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_scan_pending() -> bool {
    true
}

fn default_claim_stale() -> bool {
    true
}

fn default_min_idle() -> u64 {
    60_000 // 1 minute
}

fn default_block() -> u64 {
    10_000 // 10 seconds
}

fn default_subscriber_queue() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            namespace: default_namespace(),
            producer_maxlen: default_maxlen(),
            confirm_timeout_ms: default_confirm_timeout(),
            scan_pending_on_start: default_scan_pending(),
            claim_stale_messages: default_claim_stale(),
            min_idle_ms: default_min_idle(),
            block_ms: default_block(),
            subscriber_queue_len: default_subscriber_queue(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        // Build config from environment (REDISMQ_REDIS_URL, REDISMQ_NAMESPACE, ...)
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("REDISMQ")
                    .try_parsing(true)
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Per-producer settings derived from this config
    pub fn producer_options(&self) -> ProducerOptions {
        ProducerOptions {
            maxlen: self.producer_maxlen,
            timeout: Duration::from_millis(self.confirm_timeout_ms),
        }
    }

    /// Per-consumer settings derived from this config
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            scan_pending_on_start: self.scan_pending_on_start,
            claim_stale_messages: self.claim_stale_messages,
            min_idle_ms: self.min_idle_ms,
            block_ms: self.block_ms,
        }
    }
}

/// Settings for a single producer
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Approximate stream-trim bound for XADD
    pub maxlen: usize,
    /// How long a confirmed send waits for its reply
    pub timeout: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            maxlen: default_maxlen(),
            timeout: Duration::from_millis(default_confirm_timeout()),
        }
    }
}

/// Settings for a single consumer
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Inspect XPENDING when the consumer is built
    pub scan_pending_on_start: bool,
    /// XCLAIM pending entries older than `min_idle_ms` onto this consumer
    pub claim_stale_messages: bool,
    /// Staleness threshold for reclamation
    pub min_idle_ms: u64,
    /// XREADGROUP block time; bounds read-cancellation latency
    pub block_ms: u64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            scan_pending_on_start: default_scan_pending(),
            claim_stale_messages: default_claim_stale(),
            min_idle_ms: default_min_idle(),
            block_ms: default_block(),
        }
    }
}
