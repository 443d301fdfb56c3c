//! Backing-store adapter
//!
//! Thin typed contract over the Redis verbs the queue is built on:
//! PING, INCR, XADD, XREADGROUP, XACK, XCLAIM, XPENDING, XGROUP CREATE,
//! XINFO GROUPS, PUBLISH, PUBSUB NUMSUB, and dedicated pub/sub connections
//! for SUBSCRIBE/UNSUBSCRIBE.

use redis::{
    aio::{ConnectionManager, PubSub},
    streams::{
        StreamClaimReply, StreamId, StreamInfoGroupsReply, StreamMaxlen, StreamPendingCountReply,
        StreamPendingId, StreamReadOptions, StreamReadReply,
    },
    AsyncCommands, RedisResult,
};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{MqError, Result};

pub(crate) struct Store {
    client: redis::Client,
    conn: ConnectionManager,
}

impl Store {
    /// Connects the shared command connection and verifies it with PING
    pub(crate) async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(MqError::Connect)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(MqError::Connect)?;

        let store = Self { client, conn };
        store.ping().await?;

        info!(url = %url, "Connected to backing store");
        Ok(store)
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(MqError::Connect)?;
        debug!(reply = %reply, "PING");
        Ok(())
    }

    /// Atomic 64-bit counter
    pub(crate) async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let n: i64 = conn.incr(key, 1).await?;
        Ok(n)
    }

    /// XADD with approximate MAXLEN trimming; returns the assigned id
    pub(crate) async fn xadd(
        &self,
        stream: &str,
        maxlen: usize,
        fields: &[(&str, String)],
    ) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(stream, StreamMaxlen::Approx(maxlen), "*", fields)
            .await?;
        debug!(stream = %stream, id = %id, "XADD");
        Ok(id)
    }

    /// XREADGROUP for a single stream; empty vec on block timeout
    pub(crate) async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamId>> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);

        let reply: Option<StreamReadReply> =
            conn.xread_options(&[stream], &[id], &opts).await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();
        Ok(entries)
    }

    /// Removes an entry from the group's pending list
    pub(crate) async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        debug!(stream = %stream, group = %group, id = %id, "XACK");
        Ok(())
    }

    /// Transfers ownership of a pending entry onto `consumer`
    pub(crate) async fn xclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        id: &str,
    ) -> Result<Vec<StreamId>> {
        let mut conn = self.conn.clone();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle_ms as usize, &[id])
            .await?;
        Ok(reply.ids)
    }

    /// One page of the extended XPENDING form: (id, consumer, idle_ms, deliveries)
    pub(crate) async fn xpending_page(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        count: usize,
    ) -> Result<Vec<StreamPendingId>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply =
            conn.xpending_count(stream, group, start, "+", count).await?;
        Ok(reply.ids)
    }

    /// Ensures `group` exists on `stream`, creating it at the stream tail
    /// with MKSTREAM when absent
    pub(crate) async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        // XINFO GROUPS errors when the stream itself is missing
        let groups: RedisResult<StreamInfoGroupsReply> = conn.xinfo_groups(stream).await;
        if let Ok(info) = &groups {
            if info.groups.iter().any(|g| g.name == group) {
                debug!(group = %group, stream = %stream, "Consumer group already exists");
                return Ok(());
            }
        }

        let created: RedisResult<String> = conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(_) => {
                info!(group = %group, stream = %stream, "Created consumer group");
                Ok(())
            }
            // Another consumer won the create race
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(group = %group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fire-and-forget PUBLISH
    pub(crate) async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, payload).await?;
        debug!(channel = %channel, "PUBLISH");
        Ok(())
    }

    /// Subscriber counts per channel
    pub(crate) async fn pubsub_numsub(&self, channels: &[String]) -> Result<HashMap<String, usize>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("PUBSUB");
        cmd.arg("NUMSUB");
        for channel in channels {
            cmd.arg(channel);
        }
        let counts: HashMap<String, usize> = cmd.query_async(&mut conn).await?;
        Ok(counts)
    }

    /// Opens a dedicated pub/sub connection. Subscriptions die with the
    /// returned handle, so a dropped waiter cannot leak its channel.
    pub(crate) async fn pubsub(&self) -> Result<PubSub> {
        let pubsub = self.client.get_async_pubsub().await?;
        Ok(pubsub)
    }
}
