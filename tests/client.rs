//! Client lifecycle, producer registry and shutdown draining
//!
//! Run with: cargo test -- --ignored

mod common;

use anyhow::Result;
use redismq::{MqError, Status};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_connect_and_close() -> Result<()> {
    let client = common::connect("mq-test-lifecycle-ns").await?;
    assert_eq!(client.status(), Status::Ready);

    client.close().await?;
    assert_eq!(client.status(), Status::Closed);

    // Second close is an error
    assert!(matches!(client.close().await, Err(MqError::AlreadyClosed)));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_connect_refused() {
    let result = redismq::Client::connect("redis://127.0.0.1:1", None).await;
    assert!(matches!(result, Err(MqError::Connect(_))));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_same_producer_twice() -> Result<()> {
    let client = common::connect("mq-test-registry-ns").await?;

    let my_producer = client.producer("mq-test-registry")?;
    let your_producer = client.producer("mq-test-registry")?;
    assert!(Arc::ptr_eq(&my_producer, &your_producer));

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_dispose_producer() -> Result<()> {
    let stream = "mq-test-dispose";
    let client = common::connect("mq-test-dispose-ns").await?;

    let producer = client.producer(stream)?;
    client.dispose_producer(&producer)?;

    // Already removed from the registry
    assert!(matches!(
        client.dispose_producer(&producer),
        Err(MqError::RegistryMismatch(_))
    ));

    // A disposed producer refuses to send
    assert!(matches!(
        producer.add_unconfirmed_message(&json!("m")).await,
        Err(MqError::ProducerDisposed(_))
    ));

    // The registry slot is free again
    let replacement = client.producer(stream)?;
    assert!(!Arc::ptr_eq(&producer, &replacement));

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_close_waits_for_payloads() -> Result<()> {
    let stream = "mq-test-drain";
    common::reset_stream(stream).await?;

    let client = common::connect("mq-test-drain-ns").await?;
    let mut consumer = client.consumer(stream, "mygroup", "consumer1").await?;
    let producer = client.producer(stream)?;
    producer.add_unconfirmed_message(&json!("work item")).await?;

    let payload = consumer.read().await?;
    assert_eq!(client.in_flight(), 1);

    let closer = {
        let client = client.clone();
        tokio::spawn(async move { client.close().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!closer.is_finished(), "close returned with a payload in flight");

    // Acks are still allowed while the client drains
    payload.ack(None).await?;
    closer.await??;
    assert_eq!(client.status(), Status::Closed);

    // New work is rejected after close
    assert!(matches!(
        producer.add_unconfirmed_message(&json!("late")).await,
        Err(MqError::ProducerDisposed(_) | MqError::NotReady(_))
    ));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_double_ack_rejected() -> Result<()> {
    let stream = "mq-test-doubleack";
    common::reset_stream(stream).await?;

    let client = common::connect("mq-test-doubleack-ns").await?;
    let mut consumer = client.consumer(stream, "mygroup", "consumer1").await?;
    let producer = client.producer(stream)?;
    producer.add_unconfirmed_message(&json!("once")).await?;

    let payload = consumer.read().await?;
    payload.ack(None).await?;
    assert!(matches!(
        payload.nack("again").await,
        Err(MqError::AlreadyAcked)
    ));

    client.close().await?;
    Ok(())
}
