//! Error types for the message queue

use thiserror::Error;

use crate::client::Status;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connect failed: {0}")]
    Connect(#[source] redis::RedisError),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Client is not ready (status: {0:?})")]
    NotReady(Status),

    #[error("Client already closed")]
    AlreadyClosed,

    #[error("Producer for stream {0} is not the registered producer")]
    RegistryMismatch(String),

    #[error("Producer for stream {0} has been disposed")]
    ProducerDisposed(String),

    #[error("Payload already acknowledged")]
    AlreadyAcked,

    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),
}

pub type Result<T> = std::result::Result<T, MqError>;
