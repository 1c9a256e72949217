//! The abstract broker transport contract.

use crate::error::{TopicShapeError, TransportError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type Headers = BTreeMap<String, Vec<u8>>;

/// A record handed to a subscriber: raw key/value bytes plus headers, as
/// they arrived off the wire (or the in-memory channel). Decoding into a
/// `ChangeMap` is the stream layer's job, not the adapter's.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

/// A subscriber callback. Returning `Err` is logged by the caller and does
/// not stop the consumer loop (at-least-once, isolated handler failures).
pub type ObserverFn =
    Arc<dyn Fn(RawRecord) -> futures::future::BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The transport every [`crate::stream::Stream`] is built on.
///
/// Implementations must route all records for the same key to the same
/// partition (see [`partition_of`]) and must reject a second subscriber for
/// the same `(topic, role)` pair with
/// [`TransportError::ObserverAlreadyBound`].
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Create the topic if absent; if it exists with a different partition
    /// count, fail with [`TopicShapeError::PartitionMismatch`].
    async fn ensure_topic(&self, name: &str, partitions: u32) -> Result<(), TopicShapeError>;

    async fn produce(
        &self,
        topic: &str,
        key: Vec<u8>,
        value: Vec<u8>,
        headers: Headers,
    ) -> Result<(), TransportError>;

    /// Bind `observer` as the sole consumer for `(topic, role)`. `role`
    /// distinguishes multiple logical consumers of the same topic within one
    /// process (e.g. a publishing-side dispatcher vs. a storage binding).
    async fn subscribe(
        &self,
        topic: &str,
        role: &str,
        observer: ObserverFn,
    ) -> Result<(), TransportError>;
}

/// Deterministic key -> partition mapping shared by every adapter
/// implementation, so a `MemoryBroker`-backed test exercises the same
/// partitioning behavior as `KafkaBroker` (which otherwise relies on
/// `rdkafka`'s own default partitioner for real topics).
pub fn partition_of(key: &[u8], partitions: u32) -> u32 {
    if partitions == 0 {
        return 0;
    }
    let mut hash: u32 = 2166136261;
    for b in key {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_maps_to_same_partition() {
        let a = partition_of(b"user-1", 8);
        let b = partition_of(b"user-1", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn zero_partitions_is_degenerate_but_safe() {
        assert_eq!(partition_of(b"x", 0), 0);
    }
}
