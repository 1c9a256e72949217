//! Kafka-backed broker adapter, built on `rdkafka`'s `FutureProducer` and
//! `StreamConsumer`, following the consumer-setup and headers-forwarding
//! idiom this workspace already used for its Kafka source.

use crate::adapter::{BrokerAdapter, Headers, ObserverFn, RawRecord};
use crate::error::{TopicShapeError, TransportError};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers as KafkaHeaders, Message, OwnedHeaders};
use rdkafka::metadata::Metadata;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub struct KafkaBroker {
    brokers: String,
    group_id: String,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    bound_roles: Mutex<HashMap<(String, String), ()>>,
}

impl KafkaBroker {
    pub fn connect(brokers: &str, group_id: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()?;
        Ok(KafkaBroker {
            brokers: brokers.to_string(),
            group_id: group_id.to_string(),
            producer,
            admin,
            bound_roles: Mutex::new(HashMap::new()),
        })
    }

    fn metadata(&self, topic: &str) -> anyhow::Result<Metadata> {
        Ok(self
            .producer
            .client()
            .fetch_metadata(Some(topic), Timeout::After(Duration::from_secs(5)))?)
    }
}

#[async_trait]
impl BrokerAdapter for KafkaBroker {
    async fn ensure_topic(&self, name: &str, partitions: u32) -> Result<(), TopicShapeError> {
        if let Ok(meta) = self.metadata(name) {
            if let Some(t) = meta.topics().iter().find(|t| t.name() == name) {
                if !t.partitions().is_empty() {
                    let existing = t.partitions().len() as u32;
                    if existing != partitions {
                        return Err(TopicShapeError::PartitionMismatch {
                            topic: name.to_string(),
                            existing,
                            requested: partitions,
                        });
                    }
                    return Ok(());
                }
            }
        }

        let new_topic = NewTopic::new(name, partitions as i32, TopicReplication::Fixed(1));
        let _ = self
            .admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await;
        Ok(())
    }

    async fn produce(
        &self,
        topic: &str,
        key: Vec<u8>,
        value: Vec<u8>,
        headers: Headers,
    ) -> Result<(), TransportError> {
        let mut kafka_headers = OwnedHeaders::new();
        for (k, v) in &headers {
            kafka_headers = kafka_headers.insert(rdkafka::message::Header {
                key: k.as_str(),
                value: Some(v.as_slice()),
            });
        }
        let record = FutureRecord::to(topic)
            .key(&key)
            .payload(&value)
            .headers(kafka_headers);
        self.producer
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
            .map_err(|(err, _)| TransportError::Produce {
                topic: topic.to_string(),
                source: anyhow::anyhow!(err),
            })?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        role: &str,
        observer: ObserverFn,
    ) -> Result<(), TransportError> {
        {
            let mut bound = self.bound_roles.lock().expect("kafka broker mutex poisoned");
            let key = (topic.to_string(), role.to_string());
            if bound.contains_key(&key) {
                return Err(TransportError::ObserverAlreadyBound {
                    topic: topic.to_string(),
                    role: role.to_string(),
                });
            }
            bound.insert(key, ());
        }

        let group_id = format!("{}-{}", self.group_id, role);
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| TransportError::Consume {
                topic: topic.to_string(),
                source: anyhow::anyhow!(e),
            })?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| TransportError::Consume {
                topic: topic.to_string(),
                source: anyhow::anyhow!(e),
            })?;

        let topic_name = topic.to_string();
        tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(msg) => {
                        let key = msg.key().unwrap_or(&[]).to_vec();
                        let value = msg.payload().unwrap_or(&[]).to_vec();
                        let mut headers = Headers::new();
                        if let Some(h) = msg.headers() {
                            for i in 0..h.count() {
                                let header = h.get(i);
                                headers.insert(header.key.to_string(), header.value.unwrap_or(&[]).to_vec());
                            }
                        }
                        let record = RawRecord { key, value, headers };
                        match observer(record).await {
                            Ok(()) => {
                                if let Err(err) = consumer.commit_message(&msg, CommitMode::Async) {
                                    tracing::error!(topic = %topic_name, %err, "failed to commit offset after observer completed");
                                }
                            }
                            Err(err) => {
                                tracing::error!(topic = %topic_name, %err, "observer failed on record, offset not advanced");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(topic = %topic_name, %err, "kafka consumer error");
                    }
                }
            }
        });
        Ok(())
    }
}
