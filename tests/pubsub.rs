//! Multi-channel pub/sub fan-out
//!
//! Run with: cargo test -- --ignored

mod common;

use anyhow::Result;
use serde_json::json;

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_one_to_one() -> Result<()> {
    let client = common::connect("mq-test-ps1-ns").await?;
    let publisher = client.publisher(&["mq-test-ps1:topic1"]);
    let mut subscriber = client.subscriber(&["mq-test-ps1:topic1"]).await?;

    let published = publisher.publish(&json!("hi there"), &[]).await?;
    assert_eq!(published, 1);

    let payload = subscriber.read().await?;
    assert_eq!(payload.message(), &json!("hi there"));
    assert_eq!(payload.channel(), "mq-test-ps1:topic1");
    payload.ack()?;

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_one_to_many_same_channel() -> Result<()> {
    let client = common::connect("mq-test-ps2-ns").await?;
    let publisher = client.publisher(&["mq-test-ps2:topic1"]);
    let mut subscriber1 = client.subscriber(&["mq-test-ps2:topic1"]).await?;
    let mut subscriber2 = client.subscriber(&["mq-test-ps2:topic1"]).await?;

    publisher.publish(&json!("hi there"), &[]).await?;

    for subscriber in [&mut subscriber1, &mut subscriber2] {
        let payload = subscriber.read().await?;
        assert_eq!(payload.message(), &json!("hi there"));
        payload.ack()?;
    }

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_one_to_many_different_channels() -> Result<()> {
    let client = common::connect("mq-test-ps3-ns").await?;
    let publisher = client.publisher(&["mq-test-ps3:topic1", "mq-test-ps3:topic2"]);
    let mut subscriber1 = client.subscriber(&["mq-test-ps3:topic1"]).await?;
    let mut subscriber2 = client.subscriber(&["mq-test-ps3:topic2"]).await?;

    let published = publisher.publish(&json!("hi there"), &[]).await?;
    assert_eq!(published, 2);

    for subscriber in [&mut subscriber1, &mut subscriber2] {
        let payload = subscriber.read().await?;
        assert_eq!(payload.message(), &json!("hi there"));
        payload.ack()?;
    }

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_publish_extra_channels() -> Result<()> {
    let client = common::connect("mq-test-ps4-ns").await?;
    // No default channels; targets supplied per call
    let publisher = client.publisher(&[]);
    let mut subscriber = client
        .subscriber(&["mq-test-ps4:topic1", "mq-test-ps4:topic2"])
        .await?;

    publisher
        .publish(&json!("hi there"), &["mq-test-ps4:topic1", "mq-test-ps4:topic2"])
        .await?;

    let payload1 = subscriber.read().await?;
    let payload2 = subscriber.read().await?;
    payload1.ack()?;
    payload2.ack()?;

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_publish_without_subscribers() -> Result<()> {
    let client = common::connect("mq-test-ps5-ns").await?;
    let publisher = client.publisher(&["mq-test-ps5:nobody-listens"]);

    // NUMSUB shows no subscribers, so nothing is sent
    let published = publisher.publish(&json!("hi there"), &[]).await?;
    assert_eq!(published, 0);

    client.close().await?;
    Ok(())
}
