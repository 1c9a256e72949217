//! In-process broker adapter: lossless, FIFO, single-subscriber-per-role
//! channels. Used by tests and demo binaries so the suite never needs a
//! live Kafka cluster.

use crate::adapter::{partition_of, BrokerAdapter, Headers, ObserverFn, RawRecord};
use crate::error::{TopicShapeError, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

struct Topic {
    partitions: u32,
    consumers: HashMap<String, mpsc::UnboundedSender<RawRecord>>,
}

#[derive(Default)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, Topic>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }
}

#[async_trait]
impl BrokerAdapter for MemoryBroker {
    async fn ensure_topic(&self, name: &str, partitions: u32) -> Result<(), TopicShapeError> {
        let mut topics = self.topics.lock().expect("memory broker mutex poisoned");
        match topics.get(name) {
            Some(existing) if existing.partitions != partitions => {
                Err(TopicShapeError::PartitionMismatch {
                    topic: name.to_string(),
                    existing: existing.partitions,
                    requested: partitions,
                })
            }
            Some(_) => Ok(()),
            None => {
                topics.insert(
                    name.to_string(),
                    Topic {
                        partitions,
                        consumers: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn produce(
        &self,
        topic: &str,
        key: Vec<u8>,
        value: Vec<u8>,
        headers: Headers,
    ) -> Result<(), TransportError> {
        let partitions = {
            let topics = self.topics.lock().expect("memory broker mutex poisoned");
            topics.get(topic).map(|t| t.partitions).unwrap_or(1)
        };
        // partition_of is computed for parity with the Kafka adapter's
        // routing guarantee even though this in-process fan-out does not
        // need separate partition channels.
        let _partition = partition_of(&key, partitions.max(1));
        let record = RawRecord {
            key,
            value,
            headers,
        };
        let topics = self.topics.lock().expect("memory broker mutex poisoned");
        let Some(t) = topics.get(topic) else {
            return Err(TransportError::Produce {
                topic: topic.to_string(),
                source: anyhow::anyhow!("topic not created via ensure_topic"),
            });
        };
        for sender in t.consumers.values() {
            // An unbounded send only fails if the receiving task has
            // stopped; dropping that record is acceptable, it mirrors a
            // crashed consumer in the real adapter.
            let _ = sender.send(record.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        role: &str,
        observer: ObserverFn,
    ) -> Result<(), TransportError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<RawRecord>();
        {
            let mut topics = self.topics.lock().expect("memory broker mutex poisoned");
            let t = topics.entry(topic.to_string()).or_insert_with(|| Topic {
                partitions: 1,
                consumers: HashMap::new(),
            });
            if t.consumers.contains_key(role) {
                return Err(TransportError::ObserverAlreadyBound {
                    topic: topic.to_string(),
                    role: role.to_string(),
                });
            }
            t.consumers.insert(role.to_string(), tx);
        }

        let topic_name = topic.to_string();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = observer(record).await {
                    tracing::error!(topic = %topic_name, %err, "observer failed on record");
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn delivers_produced_record_to_subscriber() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t1", 1).await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        broker
            .subscribe(
                "t1",
                "role-a",
                Arc::new(move |_rec| {
                    let count = count2.clone();
                    Box::pin(async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();
        broker
            .produce("t1", b"k".to_vec(), b"v".to_vec(), Headers::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_second_subscriber_for_same_role() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t1", 1).await.unwrap();
        broker
            .subscribe("t1", "role-a", Arc::new(|_| Box::pin(async { Ok(()) })))
            .await
            .unwrap();
        let err = broker
            .subscribe("t1", "role-a", Arc::new(|_| Box::pin(async { Ok(()) })))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ObserverAlreadyBound { .. }));
    }

    #[tokio::test]
    async fn partition_mismatch_is_rejected() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t1", 4).await.unwrap();
        let err = broker.ensure_topic("t1", 8).await.unwrap_err();
        assert!(matches!(err, TopicShapeError::PartitionMismatch { .. }));
    }
}
