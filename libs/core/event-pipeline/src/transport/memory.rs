//! In-memory transport.
//!
//! A process-local broker with the same delivery semantics the Redis
//! transport offers: partitioned append-only logs, consumer groups sharing a
//! cursor, entries pending until committed, and pending entries replayed to a
//! reader that reuses the consumer name. Entries another consumer left pending
//! for longer than `claim_idle` are claimed by whichever reader asks next.
//! Fault injection hooks let tests exercise publish failures, reader failures
//! and slow acknowledgements.

use super::{DeliveryReceipt, Publisher, TopicReader, Transport};
use crate::config::ConsumerConfig;
use crate::envelope::{Envelope, ReceivedEnvelope, partition_for};
use crate::error::PipelineError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

/// Process-local message broker.
///
/// Cloning is cheap; clones share the same logs.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

#[derive(Default)]
struct BrokerState {
    partitions: u32,
    topics: HashMap<String, TopicLog>,
    history: Vec<Envelope>,
    readers_opened: usize,
    readers_closed: usize,
    faults: Faults,
}

#[derive(Default)]
struct Faults {
    publish_failures: u32,
    publish_delay: Option<Duration>,
    reader_failures: HashSet<String>,
    close_failures: HashSet<String>,
    fetch_failures: HashMap<String, u32>,
}

#[derive(Default)]
struct TopicLog {
    partitions: Vec<Vec<Envelope>>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    /// Next undelivered index per partition
    next: Vec<usize>,
    /// Delivered but uncommitted entries
    pending: BTreeMap<(u32, usize), PendingEntry>,
    committed: usize,
}

/// Ownership record of a delivered entry
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

impl PendingEntry {
    fn new(consumer: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
            delivered_at: Instant::now(),
            deliveries: 1,
        }
    }

    /// Hand the entry to `consumer` again, returning its delivery count
    fn redeliver(&mut self, consumer: &str) -> u32 {
        self.consumer = consumer.to_string();
        self.delivered_at = Instant::now();
        self.deliveries += 1;
        self.deliveries
    }
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: vec![Vec::new(); partitions as usize],
            groups: HashMap::new(),
        }
    }

    fn group_mut(&mut self, group: &str) -> &mut GroupState {
        let partitions = self.partitions.len();
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                next: vec![0; partitions],
                ..GroupState::default()
            })
    }

    fn received(&self, (partition, index): (u32, usize), deliveries: u32) -> ReceivedEnvelope {
        let envelope = self.partitions[partition as usize][index].clone();
        ReceivedEnvelope::new(envelope, partition, format!("{}-{}", partition, index))
            .with_delivery_count(deliveries)
    }
}

impl BrokerState {
    fn partitions(&self) -> u32 {
        self.partitions.max(1)
    }

    fn topic_mut(&mut self, topic: &str) -> &mut TopicLog {
        let partitions = self.partitions();
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(partitions))
    }
}

impl InMemoryBroker {
    /// Create a broker with single-partition topics
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker whose topics have `partitions` partitions
    pub fn with_partitions(partitions: u32) -> Self {
        let broker = Self::default();
        broker.state().partitions = partitions.max(1);
        broker
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` publishes with a transport error
    pub fn fail_publishes(&self, count: u32) {
        self.state().faults.publish_failures = count;
    }

    /// Delay every publish acknowledgement
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state().faults.publish_delay = delay;
    }

    /// Make reader creation fail for `topic`
    pub fn fail_reader(&self, topic: impl Into<String>) {
        self.state().faults.reader_failures.insert(topic.into());
    }

    /// Make closing readers of `topic` fail
    pub fn fail_close(&self, topic: impl Into<String>) {
        self.state().faults.close_failures.insert(topic.into());
    }

    /// Fail the next `count` fetches on `topic` with a transport error
    pub fn fail_fetches(&self, topic: impl Into<String>, count: u32) {
        self.state().faults.fetch_failures.insert(topic.into(), count);
    }

    /// Every envelope published to `topic`, in publish order
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.state()
            .history
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Entries of `topic` not yet delivered to anyone in `group`
    pub fn undelivered(&self, topic: &str, group: &str) -> usize {
        let state = self.state();
        let Some(log) = state.topics.get(topic) else {
            return 0;
        };
        let total: usize = log.partitions.iter().map(Vec::len).sum();
        let delivered: usize = log
            .groups
            .get(group)
            .map(|g| g.next.iter().sum())
            .unwrap_or(0);
        total - delivered
    }

    /// Entries of `topic` delivered to `group` but not committed
    pub fn pending(&self, topic: &str, group: &str) -> usize {
        self.state()
            .topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Entries of `topic` committed by `group`
    pub fn committed(&self, topic: &str, group: &str) -> usize {
        self.state()
            .topics
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map(|g| g.committed)
            .unwrap_or(0)
    }

    /// Readers created and not yet closed
    pub fn open_readers(&self) -> usize {
        let state = self.state();
        state.readers_opened - state.readers_closed
    }

    fn append(&self, envelope: &Envelope) -> Result<DeliveryReceipt, PipelineError> {
        let mut state = self.state();
        if state.faults.publish_failures > 0 {
            state.faults.publish_failures -= 1;
            return Err(PipelineError::transport("injected publish failure"));
        }

        let partition = partition_for(&envelope.key, state.partitions());
        let log = &mut state.topic_mut(&envelope.topic).partitions[partition as usize];
        log.push(envelope.clone());
        let offset = format!("{}-{}", partition, log.len() - 1);
        state.history.push(envelope.clone());
        drop(state);

        self.inner.notify.notify_waiters();

        Ok(DeliveryReceipt {
            topic: envelope.topic.clone(),
            partition,
            offset,
        })
    }

    /// Take the next entry for a reader: its replayed pending entries first,
    /// then entries abandoned by other consumers, then undelivered entries
    /// round-robin across partitions.
    fn take_next(
        &self,
        reader: &mut InMemoryReader,
    ) -> Result<Option<ReceivedEnvelope>, PipelineError> {
        let mut state = self.state();

        if let Some(remaining) = state.faults.fetch_failures.get_mut(&reader.topic) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PipelineError::transport("injected fetch failure"));
            }
        }

        let log = state.topic_mut(&reader.topic);
        let partitions = log.partitions.len();

        while let Some(position) = reader.replay.pop_front() {
            let replayed = log
                .group_mut(&reader.group)
                .pending
                .get_mut(&position)
                .filter(|entry| entry.consumer == reader.consumer)
                .map(|entry| entry.redeliver(&reader.consumer));
            if let Some(deliveries) = replayed {
                return Ok(Some(log.received(position, deliveries)));
            }
        }

        let claimed = log
            .group_mut(&reader.group)
            .pending
            .iter_mut()
            .find(|(_, entry)| {
                entry.consumer != reader.consumer && entry.delivered_at.elapsed() >= reader.claim_idle
            })
            .map(|(position, entry)| {
                let previous = std::mem::take(&mut entry.consumer);
                (*position, previous, entry.redeliver(&reader.consumer))
            });
        if let Some((position, previous, deliveries)) = claimed {
            info!(
                topic = %reader.topic,
                group = %reader.group,
                consumer = %reader.consumer,
                previous_owner = %previous,
                partition = position.0,
                index = position.1,
                "Claimed abandoned entry"
            );
            return Ok(Some(log.received(position, deliveries)));
        }

        for step in 0..partitions {
            let partition = (reader.next_partition + step) % partitions;
            let index = log.group_mut(&reader.group).next[partition];
            let Some(envelope) = log.partitions[partition].get(index).cloned() else {
                continue;
            };

            let group = log.group_mut(&reader.group);
            group.next[partition] += 1;
            group
                .pending
                .insert((partition as u32, index), PendingEntry::new(&reader.consumer));
            reader.next_partition = (partition + 1) % partitions;

            return Ok(Some(ReceivedEnvelope::new(
                envelope,
                partition as u32,
                format!("{}-{}", partition, index),
            )));
        }

        Ok(None)
    }

    fn ack(&self, topic: &str, group: &str, offset: &str) -> Result<(), PipelineError> {
        let position = parse_offset(offset)
            .ok_or_else(|| PipelineError::transport(format!("invalid offset '{}'", offset)))?;

        let mut state = self.state();
        let group = state.topic_mut(topic).group_mut(group);
        if group.pending.remove(&position).is_some() {
            group.committed += 1;
        }
        Ok(())
    }
}

fn parse_offset(offset: &str) -> Option<(u32, usize)> {
    let (partition, index) = offset.split_once('-')?;
    Some((partition.parse().ok()?, index.parse().ok()?))
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, envelope: &Envelope) -> Result<DeliveryReceipt, PipelineError> {
        let delay = self.state().faults.publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.append(envelope)
    }

    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn reader(
        &self,
        topic: &str,
        config: &ConsumerConfig,
    ) -> Result<Box<dyn TopicReader>, PipelineError> {
        let mut state = self.state();
        if state.faults.reader_failures.contains(topic) {
            return Err(PipelineError::transport(format!(
                "injected reader failure for topic '{}'",
                topic
            )));
        }

        let group = state.topic_mut(topic).group_mut(&config.group_id);
        let replay: VecDeque<(u32, usize)> = group
            .pending
            .iter()
            .filter(|(_, entry)| entry.consumer == config.consumer_id)
            .map(|(position, _)| *position)
            .collect();
        state.readers_opened += 1;

        debug!(
            topic = %topic,
            group = %config.group_id,
            replay = replay.len(),
            "In-memory reader created"
        );

        Ok(Box::new(InMemoryReader {
            broker: self.clone(),
            topic: topic.to_string(),
            group: config.group_id.clone(),
            consumer: config.consumer_id.clone(),
            poll_interval: config.poll_interval,
            claim_idle: config.claim_idle,
            replay,
            next_partition: 0,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

struct InMemoryReader {
    broker: InMemoryBroker,
    topic: String,
    group: String,
    consumer: String,
    poll_interval: Duration,
    claim_idle: Duration,
    replay: VecDeque<(u32, usize)>,
    next_partition: usize,
    closed: bool,
}

#[async_trait]
impl TopicReader for InMemoryReader {
    async fn fetch(&mut self) -> Result<Option<ReceivedEnvelope>, PipelineError> {
        if self.closed {
            return Err(PipelineError::Shutdown);
        }

        // Register for wakeups before checking so a concurrent publish is not missed
        let broker = self.broker.clone();
        let notified = broker.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(message) = broker.take_next(self)? {
            return Ok(Some(message));
        }

        tokio::select! {
            _ = &mut notified => broker.take_next(self),
            _ = tokio::time::sleep(self.poll_interval) => Ok(None),
        }
    }

    async fn commit(&mut self, message: &ReceivedEnvelope) -> Result<(), PipelineError> {
        self.broker.ack(&self.topic, &self.group, &message.offset)
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut state = self.broker.state();
        state.readers_closed += 1;
        if state.faults.close_failures.contains(&self.topic) {
            return Err(PipelineError::transport(format!(
                "injected close failure for topic '{}'",
                self.topic
            )));
        }
        Ok(())
    }
}
