//! Error taxonomy for `gs-broker`.

#[derive(Debug, thiserror::Error)]
pub enum TopicShapeError {
    #[error("topic {topic} exists with {existing} partitions, requested {requested}")]
    PartitionMismatch {
        topic: String,
        existing: u32,
        requested: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("produce to topic {topic} failed: {source}")]
    Produce {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("consumer setup for topic {topic} failed: {source}")]
    Consume {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("a consumer is already bound to topic {topic} role {role}")]
    ObserverAlreadyBound { topic: String, role: String },
}
