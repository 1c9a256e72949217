//! Error taxonomy for `gs-dispatch`.

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("a consumer is already bound to (topic {topic}, role {role})")]
    ObserverAlreadyBound { topic: String, role: String },

    #[error("handler {handler} panicked or was cancelled: {source}")]
    HandlerPanicked {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler {handler} returned an error: {source}")]
    HandlerFailed {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("scheduler interval must be >= 0.01s, got {0}")]
    IntervalTooShort(f64),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
}
