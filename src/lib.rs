//! redismq - message queue and request/response fabric on Redis Streams
//!
//! Producers append messages to named streams; consumers in named groups
//! read, process and acknowledge them. Features:
//! - Confirmed sends: RPC semantics over an ephemeral pub/sub reply channel
//! - Two-phase consumer read loop (backlog drain, then live tail)
//! - Pending-entry reclamation via XCLAIM after an idle threshold
//! - Graceful shutdown that waits for in-flight payloads
//! - Fan-out pub/sub with bounded delivery queues
//!
//! ```no_run
//! use serde_json::json;
//!
//! # async fn demo() -> redismq::Result<()> {
//! let client = redismq::Client::connect("redis://127.0.0.1:6379", None).await?;
//! let producer = client.producer("mystream")?;
//! let reply = producer.add_confirmed_message(&json!("Hello there!")).await?;
//! println!("consumer said: {}", reply["message"]);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod consumer;
mod error;
mod payload;
mod producer;
mod publisher;
mod store;
mod subscriber;

pub use client::{Client, Status};
pub use tokio_util::sync::CancellationToken;
pub use config::{Config, ConsumerOptions, ProducerOptions};
pub use consumer::Consumer;
pub use error::{MqError, Result};
pub use payload::Payload;
pub use producer::Producer;
pub use publisher::Publisher;
pub use subscriber::{PubSubPayload, Subscriber};
