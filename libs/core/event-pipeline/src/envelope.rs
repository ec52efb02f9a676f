//! Message envelope and codec
//!
//! An [`Envelope`] is the `topic/key/value` unit exchanged with the transport.
//! Payloads are JSON-encoded into `value`; `key` is used for partition
//! assignment so that related events (e.g. one recipient's) stay together.

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// Transport-agnostic message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Topic the envelope is published to
    pub topic: String,
    /// Partition key (raw bytes)
    pub key: Vec<u8>,
    /// Encoded payload
    pub value: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from raw parts
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Encode a typed payload into an envelope
    pub fn encode<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<Vec<u8>>,
        payload: &T,
    ) -> Result<Self, PipelineError> {
        let value = serde_json::to_vec(payload)?;
        Ok(Self::new(topic, key, value))
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        Ok(serde_json::from_slice(&self.value)?)
    }

    /// Key as UTF-8 for logging (lossy)
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Stable key to partition mapping.
///
/// Uses the first four bytes of the key's SHA-256 digest so the mapping is
/// identical across processes and releases.
pub fn partition_for(key: &[u8], partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key);
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions
}

/// An envelope as pulled from a topic reader, with its transport position
#[derive(Debug, Clone)]
pub struct ReceivedEnvelope {
    /// The envelope itself
    pub envelope: Envelope,

    /// Partition the entry was read from
    pub partition: u32,

    /// Transport position (Redis stream entry ID, in-memory log index, ...)
    pub offset: String,

    /// Number of times this entry has been delivered to the group
    pub delivery_count: u32,

    /// When this worker pulled the entry
    pub received_at: DateTime<Utc>,
}

impl ReceivedEnvelope {
    /// Create a freshly delivered envelope
    pub fn new(envelope: Envelope, partition: u32, offset: impl Into<String>) -> Self {
        Self {
            envelope,
            partition,
            offset: offset.into(),
            delivery_count: 1,
            received_at: Utc::now(),
        }
    }

    /// Set the delivery count (redeliveries of pending entries)
    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    /// Topic name
    pub fn topic(&self) -> &str {
        &self.envelope.topic
    }

    /// Check if this is a redelivery
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
