//! Redis Streams event source.
//!
//! Order events are read through a consumer group. Entries stay in the
//! group's pending list until acknowledged with `XACK`, and this consumer's
//! pending entries are always re-read before new ones, so an event whose
//! application failed (or whose consumer died) is delivered again.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};

use crate::error::BusError;
use crate::source::{Delivery, EventSource};

/// Stream entry field holding the JSON event.
pub const PAYLOAD_FIELD: &str = "payload";

/// Connection settings for [`RedisStreamsSource`].
#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub url: String,
    pub stream: String,
    pub group: String,
    /// Must be stable across restarts so pending entries are picked up again.
    pub consumer: String,
    /// How long a fetch blocks waiting for new entries.
    pub block: Duration,
}

/// Consumer-group reader over one Redis stream.
#[derive(Clone)]
pub struct RedisStreamsSource {
    connection: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block: Duration,
}

impl RedisStreamsSource {
    /// Connects and creates the stream and consumer group if missing.
    pub async fn connect(config: &RedisStreamsConfig) -> Result<Self, BusError> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = client.get_multiplexed_async_connection().await?;

        let source = Self {
            connection,
            stream: config.stream.clone(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            block: config.block,
        };
        source.ensure_group().await?;

        tracing::info!(
            stream = %source.stream,
            group = %source.group,
            consumer = %source.consumer,
            "connected to event stream"
        );
        Ok(source)
    }

    async fn ensure_group(&self) -> Result<(), BusError> {
        let mut conn = self.connection.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Appends an event payload to the stream. Returns the entry id.
    pub async fn publish(&self, payload: &[u8]) -> Result<String, BusError> {
        let mut conn = self.connection.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        Ok(id)
    }

    async fn read(
        &self,
        start: &str,
        options: &StreamReadOptions,
    ) -> Result<Vec<StreamId>, BusError> {
        let mut conn = self.connection.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[start], options)
            .await?;

        Ok(reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default())
    }

    fn to_delivery(entry: StreamId, redelivered: bool) -> Delivery {
        // Trimmed entries come back without fields; an empty payload is
        // discarded as malformed.
        let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
        Delivery {
            receipt: entry.id.clone(),
            stable_id: Some(entry.id),
            payload,
            redelivered,
        }
    }
}

#[async_trait]
impl EventSource for RedisStreamsSource {
    async fn fetch(&self, max: usize) -> Result<Vec<Delivery>, BusError> {
        let pending_options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max);
        let pending = self.read("0", &pending_options).await?;
        if !pending.is_empty() {
            return Ok(pending
                .into_iter()
                .map(|entry| Self::to_delivery(entry, true))
                .collect());
        }

        let new_options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max)
            .block(self.block.as_millis() as usize);
        let fresh = self.read(">", &new_options).await?;
        Ok(fresh
            .into_iter()
            .map(|entry| Self::to_delivery(entry, false))
            .collect())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[delivery.receipt.as_str()])
            .await?;
        Ok(())
    }

    async fn release(&self, _delivery: &Delivery) -> Result<(), BusError> {
        // Unacked entries stay pending and are re-read by the next fetch.
        Ok(())
    }
}
