//! Shared helpers for the live-Redis integration tests
#![allow(dead_code)]

use redis::aio::MultiplexedConnection;

pub fn test_url() -> String {
    std::env::var("REDISMQ_TEST_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub async fn connect(namespace: &str) -> anyhow::Result<redismq::Client> {
    init_tracing();
    Ok(redismq::Client::connect(&test_url(), Some(namespace)).await?)
}

/// Direct connection for test-side inspection and manipulation
pub async fn raw() -> anyhow::Result<MultiplexedConnection> {
    let client = redis::Client::open(test_url())?;
    Ok(client.get_multiplexed_async_connection().await?)
}

pub async fn reset_stream(stream: &str) -> anyhow::Result<()> {
    let mut conn = raw().await?;
    let _: i64 = redis::cmd("DEL").arg(stream).query_async(&mut conn).await?;
    Ok(())
}

/// Open pub/sub channels matching `{prefix}*`
pub async fn open_channels(prefix: &str) -> anyhow::Result<Vec<String>> {
    let mut conn = raw().await?;
    let channels: Vec<String> = redis::cmd("PUBSUB")
        .arg("CHANNELS")
        .arg(format!("{prefix}*"))
        .query_async(&mut conn)
        .await?;
    Ok(channels)
}
