//! Redis Streams transport
//!
//! Each topic partition is one Redis stream (`<topic>` when the topic has a
//! single partition, `<topic>:<n>` otherwise). Entries carry two binary
//! fields, `key` and `value`. Readers join a consumer group so that several
//! notification instances split a topic's entries instead of duplicating work.
//!
//! Entries a consumer pulled but never acknowledged stay pending under its
//! name. A reader replays its own pending entries on startup, and claims
//! entries other consumers left idle for longer than `claim_idle` (pods that
//! were restarted under a new name, or crashed mid-batch).

use super::{DeliveryReceipt, Publisher, TopicReader, Transport};
use crate::config::ConsumerConfig;
use crate::envelope::{Envelope, ReceivedEnvelope, partition_for};
use crate::error::PipelineError;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisResult, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Field holding the partition key
const KEY_FIELD: &str = "key";
/// Field holding the encoded payload
const VALUE_FIELD: &str = "value";
/// Extra response time granted to a reader connection beyond its BLOCK time
const BLOCK_RESPONSE_SLACK: Duration = Duration::from_secs(1);

/// Stream name for a topic partition
pub fn stream_key(topic: &str, partition: u32, partitions: u32) -> String {
    if partitions <= 1 {
        topic.to_string()
    } else {
        format!("{}:{}", topic, partition)
    }
}

/// Redis Streams transport.
///
/// Every reader and publisher created from it opens its own connection.
#[derive(Clone)]
pub struct RedisTransport {
    client: Client,
    partitions: u32,
    max_length: i64,
}

impl RedisTransport {
    /// Create a transport from a Redis client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            partitions: 1,
            max_length: 100_000,
        }
    }

    /// Create a transport from a connection URL
    pub fn open(url: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(Client::open(url)?))
    }

    /// Set the number of partitions per topic
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Set the maximum stream length (MAXLEN ~)
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Number of partitions per topic
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Open a new connection and verify it with PING
    pub async fn connect(&self) -> Result<ConnectionManager, PipelineError> {
        self.connect_with(ConnectionManagerConfig::new()).await
    }

    /// Open a reader connection whose response timeout outlasts a BLOCK read
    async fn connect_reader(&self, block: Duration) -> Result<ConnectionManager, PipelineError> {
        let config =
            ConnectionManagerConfig::new().set_response_timeout(Some(block + BLOCK_RESPONSE_SLACK));
        self.connect_with(config).await
    }

    async fn connect_with(
        &self,
        config: ConnectionManagerConfig,
    ) -> Result<ConnectionManager, PipelineError> {
        let manager = ConnectionManager::new_with_config(self.client.clone(), config).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(manager)
    }

    /// Create a publisher with its own connection
    pub async fn publisher(&self) -> Result<RedisPublisher, PipelineError> {
        let redis = self.connect().await?;
        Ok(RedisPublisher {
            redis,
            partitions: self.partitions,
            max_length: self.max_length,
        })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn reader(
        &self,
        topic: &str,
        config: &ConsumerConfig,
    ) -> Result<Box<dyn TopicReader>, PipelineError> {
        let redis = self.connect_reader(config.poll_interval).await?;

        let streams: Vec<String> = (0..self.partitions)
            .map(|p| stream_key(topic, p, self.partitions))
            .collect();

        let mut reader = RedisTopicReader {
            redis,
            topic: topic.to_string(),
            streams,
            group: config.group_id.clone(),
            consumer: config.consumer_id.clone(),
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            claim_idle: config.claim_idle,
            last_claim: None,
            buffer: VecDeque::new(),
            pending_drained: false,
        };
        reader.ensure_consumer_groups().await?;

        info!(
            topic = %topic,
            group = %config.group_id,
            consumer = %config.consumer_id,
            partitions = self.partitions,
            "Redis stream reader ready"
        );

        Ok(Box::new(reader))
    }

    fn name(&self) -> &'static str {
        "redis-streams"
    }
}

/// Publisher writing envelopes with XADD
#[derive(Clone)]
pub struct RedisPublisher {
    redis: ConnectionManager,
    partitions: u32,
    max_length: i64,
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, envelope: &Envelope) -> Result<DeliveryReceipt, PipelineError> {
        let mut conn = self.redis.clone();
        let partition = partition_for(&envelope.key, self.partitions);
        let stream = stream_key(&envelope.topic, partition, self.partitions);

        // XADD returns only after the server applied the write
        let offset: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(KEY_FIELD)
            .arg(envelope.key.as_slice())
            .arg(VALUE_FIELD)
            .arg(envelope.value.as_slice())
            .query_async(&mut conn)
            .await?;

        debug!(stream = %stream, offset = %offset, "Appended envelope");

        Ok(DeliveryReceipt {
            topic: envelope.topic.clone(),
            partition,
            offset,
        })
    }

    async fn close(&self) -> Result<(), PipelineError> {
        // ConnectionManager closes when the last clone is dropped
        debug!("Redis publisher closed");
        Ok(())
    }
}

/// Consumer-group reader over all partitions of one topic
struct RedisTopicReader {
    redis: ConnectionManager,
    topic: String,
    streams: Vec<String>,
    group: String,
    consumer: String,
    batch_size: usize,
    poll_interval: Duration,
    claim_idle: Duration,
    last_claim: Option<Instant>,
    buffer: VecDeque<ReceivedEnvelope>,
    /// Entries delivered to this consumer but never acknowledged are read first
    pending_drained: bool,
}

impl RedisTopicReader {
    /// Create the consumer group on every partition stream if missing
    async fn ensure_consumer_groups(&mut self) -> Result<(), PipelineError> {
        for stream in &self.streams {
            let result: RedisResult<()> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream)
                .arg(&self.group)
                .arg("0") // Entries published before the first consumer started are delivered too
                .arg("MKSTREAM")
                .query_async(&mut self.redis)
                .await;

            match result {
                Ok(()) => {
                    info!(stream = %stream, group = %self.group, "Created consumer group");
                }
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(stream = %stream, group = %self.group, "Consumer group already exists");
                }
                Err(e) => return Err(PipelineError::Redis(e)),
            }
        }
        Ok(())
    }

    /// Read one batch into the buffer, returning the number of entries read.
    ///
    /// Reads of new entries block for up to `poll_interval`.
    async fn read_batch(&mut self) -> Result<usize, PipelineError> {
        let id = if self.pending_drained { ">" } else { "0" };
        let ids = vec![id; self.streams.len()];

        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size);
        if self.pending_drained {
            opts = opts.block(self.poll_interval.as_millis() as usize);
        }

        let result: RedisResult<Option<StreamReadReply>> =
            self.redis.xread_options(&self.streams, &ids, &opts).await;

        let reply = match result.map_err(PipelineError::from) {
            Ok(reply) => reply,
            Err(e) if e.is_nogroup_error() => {
                // Stream was deleted under us
                warn!(topic = %self.topic, group = %self.group, "Consumer group missing, recreating");
                self.ensure_consumer_groups().await?;
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let Some(reply) = reply else {
            return Ok(0);
        };

        let deliveries = if self.pending_drained { 1 } else { 2 };
        let mut read = 0;
        for stream in reply.keys {
            let Some(partition) = self.streams.iter().position(|s| *s == stream.key) else {
                continue;
            };
            for entry in stream.ids {
                read += 1;
                self.buffer_entry(partition as u32, entry, deliveries).await;
            }
        }

        Ok(read)
    }

    fn claim_due(&self) -> bool {
        self.last_claim.is_none_or(|at| at.elapsed() >= self.claim_idle)
    }

    /// Claim entries other consumers left pending for at least `claim_idle`,
    /// returning the number of entries buffered.
    async fn claim_abandoned(&mut self) -> Result<usize, PipelineError> {
        let min_idle = self.claim_idle.as_millis() as u64;
        let mut claimed = 0;

        for partition in 0..self.streams.len() {
            let stream = self.streams[partition].clone();

            let pending: StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(&stream)
                .arg(&self.group)
                .arg("IDLE")
                .arg(min_idle)
                .arg("-")
                .arg("+")
                .arg(self.batch_size)
                .query_async(&mut self.redis)
                .await?;

            let abandoned: Vec<(String, String, usize)> = pending
                .ids
                .into_iter()
                .filter(|p| p.consumer != self.consumer)
                .map(|p| (p.id, p.consumer, p.times_delivered))
                .collect();
            if abandoned.is_empty() {
                continue;
            }

            let ids: Vec<&str> = abandoned.iter().map(|(id, _, _)| id.as_str()).collect();
            // MIN-IDLE again so an entry its owner touched meanwhile is left alone
            let reply: StreamClaimReply = self
                .redis
                .xclaim(&stream, &self.group, &self.consumer, min_idle, ids.as_slice())
                .await?;

            for entry in reply.ids {
                let Some((_, owner, times_delivered)) =
                    abandoned.iter().find(|(id, _, _)| *id == entry.id)
                else {
                    continue;
                };
                warn!(
                    stream = %stream,
                    offset = %entry.id,
                    previous_owner = %owner,
                    consumer = %self.consumer,
                    "Claimed abandoned entry"
                );
                let deliveries = u32::try_from(*times_delivered).unwrap_or(u32::MAX).saturating_add(1);
                claimed += 1;
                self.buffer_entry(partition as u32, entry, deliveries).await;
            }
        }

        Ok(claimed)
    }

    async fn buffer_entry(&mut self, partition: u32, entry: StreamId, deliveries: u32) {
        let key = entry.map.get(KEY_FIELD).and_then(field_bytes);
        let value = entry.map.get(VALUE_FIELD).and_then(field_bytes);

        match (key, value) {
            (Some(key), Some(value)) => {
                let envelope = Envelope::new(self.topic.clone(), key, value);
                let received = ReceivedEnvelope::new(envelope, partition, entry.id)
                    .with_delivery_count(deliveries);
                self.buffer.push_back(received);
            }
            _ => {
                // Not an envelope; acknowledge so it does not stay pending forever
                warn!(
                    topic = %self.topic,
                    partition,
                    offset = %entry.id,
                    fields = ?entry.map.keys().collect::<Vec<_>>(),
                    "Skipping stream entry without key/value fields"
                );
                let stream = &self.streams[partition as usize];
                let acked: RedisResult<i64> = self.redis.xack(stream, &self.group, &[&entry.id]).await;
                if let Err(e) = acked {
                    warn!(offset = %entry.id, error = %e, "Failed to ACK skipped entry");
                }
            }
        }
    }
}

#[async_trait]
impl TopicReader for RedisTopicReader {
    async fn fetch(&mut self) -> Result<Option<ReceivedEnvelope>, PipelineError> {
        if let Some(message) = self.buffer.pop_front() {
            return Ok(Some(message));
        }

        // Own pending entries first, then abandoned ones, then new ones
        if self.pending_drained && self.claim_due() {
            self.last_claim = Some(Instant::now());
            match self.claim_abandoned().await {
                Ok(0) => {}
                Ok(claimed) => {
                    info!(topic = %self.topic, claimed, "Claimed entries abandoned by other consumers");
                    return Ok(self.buffer.pop_front());
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Failed to claim abandoned entries");
                }
            }
        }

        let read = self.read_batch().await?;

        if read == 0 && !self.pending_drained {
            debug!(topic = %self.topic, "Pending entries drained");
            self.pending_drained = true;
        }

        Ok(self.buffer.pop_front())
    }

    async fn commit(&mut self, message: &ReceivedEnvelope) -> Result<(), PipelineError> {
        let stream = self
            .streams
            .get(message.partition as usize)
            .ok_or_else(|| {
                PipelineError::transport(format!(
                    "partition {} out of range for topic '{}'",
                    message.partition, self.topic
                ))
            })?;

        let _: i64 = self
            .redis
            .xack(stream, &self.group, &[&message.offset])
            .await?;

        debug!(stream = %stream, offset = %message.offset, "Acknowledged entry");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        // Buffered entries stay pending; this name replays them on restart,
        // other consumers claim them once idle
        if !self.buffer.is_empty() {
            warn!(
                topic = %self.topic,
                buffered = self.buffer.len(),
                "Closing reader with buffered entries; they remain pending in the group"
            );
            self.buffer.clear();
        }
        debug!(topic = %self.topic, "Redis stream reader closed");
        Ok(())
    }
}

/// Extract a binary field value
fn field_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}
