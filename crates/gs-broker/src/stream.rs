//! Binds a topic (or in-memory channel) to the codec, giving producers and
//! consumers a `ChangeMap`-shaped view instead of raw bytes.

use crate::adapter::{BrokerAdapter, Headers, ObserverFn, RawRecord};
use crate::error::TransportError;
use gs_core::codec;
use gs_core::value::{ChangeMap, StateValue};
use std::sync::Arc;

/// A change-stream observer: invoked with the entity primary key, the
/// decoded change map, and the raw headers for one record.
pub type StreamObserverFn = Arc<
    dyn Fn(Vec<u8>, ChangeMap, Headers) -> futures::future::BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct Stream {
    topic: String,
    partitions: u32,
    broker: Arc<dyn BrokerAdapter>,
}

impl Stream {
    pub async fn bind(
        broker: Arc<dyn BrokerAdapter>,
        topic: impl Into<String>,
        partitions: u32,
    ) -> Result<Self, TransportError> {
        let topic = topic.into();
        broker
            .ensure_topic(&topic, partitions)
            .await
            .map_err(|e| TransportError::Produce {
                topic: topic.clone(),
                source: anyhow::Error::from(e),
            })?;
        Ok(Stream {
            topic,
            partitions,
            broker,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode `changed` as a single record and produce it. Every non-empty
    /// `commit` (see `gs-core`'s `EntityInstance::drain_dirty`) becomes
    /// exactly one call to this method per target stream.
    pub async fn upsert(
        &self,
        pk: Vec<u8>,
        changed: ChangeMap,
        headers: Headers,
    ) -> Result<(), TransportError> {
        let value = codec::encode(&StateValue::Map(changed)).map_err(|e| TransportError::Produce {
            topic: self.topic.clone(),
            source: anyhow::Error::from(e),
        })?;
        self.broker.produce(&self.topic, pk, value, headers).await
    }

    /// Register the sole observer for `role` on this stream. A second call
    /// with the same `role` fails with
    /// [`TransportError::ObserverAlreadyBound`].
    pub async fn observe(&self, role: &str, observer: StreamObserverFn) -> Result<(), TransportError> {
        let raw: ObserverFn = Arc::new(move |record: RawRecord| {
            let observer = observer.clone();
            Box::pin(async move {
                let decoded = codec::decode(&record.value)?;
                let StateValue::Map(changed) = decoded else {
                    anyhow::bail!("stream record did not decode to a change map");
                };
                observer(record.key, changed, record.headers).await
            })
        });
        self.broker.subscribe(&self.topic, role, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn round_trips_a_change_map_through_the_stream() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let stream = Stream::bind(broker, "authors", 1).await.unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let received2 = received.clone();
        stream
            .observe(
                "test-role",
                Arc::new(move |pk, changed, _headers| {
                    let received = received2.clone();
                    Box::pin(async move {
                        assert_eq!(pk, b"u1".to_vec());
                        assert_eq!(
                            changed.get("Author.name"),
                            Some(&StateValue::Str("Ada".into()))
                        );
                        received.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        let mut changed = ChangeMap::new();
        changed.insert("Author.name".to_string(), StateValue::Str("Ada".into()));
        stream
            .upsert(b"u1".to_vec(), changed, Headers::new())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
