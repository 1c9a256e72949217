//! # gs-storage
//!
//! Materialized per-stream key/value storage, binding a [`gs_broker::Stream`]
//! observer to an embedded table indexed by `(entity_pk, variable_name)`.
//! Grounded in the original framework's `state_storage.py`
//! (`StorageKey`/`StateStorage`/`StateStreamStorage`, including its optional
//! stateful transformer and in-memory-channel-forwarding mode).

use gs_broker::adapter::Headers;
use gs_broker::stream::{Stream, StreamObserverFn};
use gs_broker::TransportError;
use gs_core::value::{ChangeMap, StateValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("underlying store failure: {0}")]
    Store(#[from] sled::Error),

    #[error("codec failure: {0}")]
    Codec(#[from] gs_core::error::CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A variable value plus whether it should be excluded from persistence,
/// as decided by a [`StatefulTransformer`] (or, in the default case, by the
/// storage's `memory_only` predicate).
#[derive(Debug, Clone)]
pub struct TransformedVar {
    pub value: StateValue,
    pub memory_only: bool,
}

pub type TransformOutput = BTreeMap<String, TransformedVar>;

/// Selects, renames, or derives variables from an incoming change record.
/// Returning `None` (or an empty map) drops the record entirely.
pub type StatefulTransformer = Arc<
    dyn Fn(Vec<u8>, ChangeMap, Headers) -> futures::future::BoxFuture<'static, anyhow::Result<Option<TransformOutput>>>
        + Send
        + Sync,
>;

fn storage_key(pk: &[u8], variable: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(pk.len() + variable.len() + 1);
    key.extend_from_slice(&(pk.len() as u32).to_be_bytes());
    key.extend_from_slice(pk);
    key.extend_from_slice(variable.as_bytes());
    key
}

pub struct StreamStorage {
    tree: sled::Tree,
    memory_only: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl StreamStorage {
    fn default_transform(&self, changed: ChangeMap) -> TransformOutput {
        changed
            .into_iter()
            .map(|(name, value)| {
                let memory_only = (self.memory_only)(&name);
                (name, TransformedVar { value, memory_only })
            })
            .collect()
    }

    async fn apply(&self, pk: Vec<u8>, output: TransformOutput) -> Result<ChangeMap, StorageError> {
        let mut forwarded = ChangeMap::new();
        for (name, tv) in output {
            if !tv.memory_only {
                let key = storage_key(&pk, &name);
                let bytes = gs_core::codec::encode(&tv.value)?;
                self.tree.insert(key, bytes)?;
            }
            forwarded.insert(name, tv.value);
        }
        self.tree.flush_async().await?;
        Ok(forwarded)
    }

    /// Bind a storage table to `stream`'s observer role `role`. `memory_only`
    /// decides, per fully-qualified variable name, whether a value is kept
    /// out of the table; `transformer`, if given, replaces the default
    /// pass-through mapping; `downstream`, if given, receives the
    /// (possibly transformed) change set after it is written.
    ///
    /// `forward_through_channel` mirrors the source's
    /// `forward_through_in_mem_channel`: when true, the transformer's output
    /// is handed to an internal unbounded channel and a separate task
    /// performs the table writes, decoupling a heavy transformer from the
    /// broker consumer loop.
    #[allow(clippy::too_many_arguments)]
    pub async fn bind(
        db: &sled::Db,
        tree_name: &str,
        stream: &Stream,
        role: &str,
        memory_only: impl Fn(&str) -> bool + Send + Sync + 'static,
        transformer: Option<StatefulTransformer>,
        downstream: Option<StreamObserverFn>,
        forward_through_channel: bool,
    ) -> Result<Arc<Self>, StorageError> {
        let tree = db.open_tree(tree_name)?;
        let storage = Arc::new(StreamStorage {
            tree,
            memory_only: Arc::new(memory_only),
        });

        let write_tx = if forward_through_channel {
            let (tx, mut rx) = mpsc::unbounded_channel::<(Vec<u8>, TransformOutput)>();
            let storage_for_task = storage.clone();
            let downstream_for_task = downstream.clone();
            tokio::spawn(async move {
                while let Some((pk, output)) = rx.recv().await {
                    match storage_for_task.apply(pk.clone(), output).await {
                        Ok(forwarded) => {
                            if let Some(d) = &downstream_for_task {
                                if let Err(err) = d(pk, forwarded, Headers::new()).await {
                                    tracing::error!(%err, "downstream observer failed");
                                }
                            }
                        }
                        Err(err) => tracing::error!(%err, "storage write failed"),
                    }
                }
            });
            Some(tx)
        } else {
            None
        };

        let storage_for_observer = storage.clone();
        let observer: StreamObserverFn = Arc::new(move |pk: Vec<u8>, changed: ChangeMap, headers: Headers| {
            let storage = storage_for_observer.clone();
            let transformer = transformer.clone();
            let downstream = downstream.clone();
            let write_tx = write_tx.clone();
            Box::pin(async move {
                let output = match &transformer {
                    Some(t) => match t(pk.clone(), changed, headers).await? {
                        Some(o) => o,
                        None => return Ok(()),
                    },
                    None => storage.default_transform(changed),
                };
                if output.is_empty() {
                    return Ok(());
                }
                if let Some(tx) = &write_tx {
                    let _ = tx.send((pk, output));
                    return Ok(());
                }
                let forwarded = storage.apply(pk.clone(), output).await?;
                if let Some(d) = &downstream {
                    d(pk, forwarded, Headers::new()).await?;
                }
                Ok(())
            })
        });

        stream.observe(role, observer).await?;
        Ok(storage)
    }

    pub async fn read(&self, pk: &[u8], variable: &str) -> Result<Option<StateValue>, StorageError> {
        let key = storage_key(pk, variable);
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(gs_core::codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn read_or(
        &self,
        pk: &[u8],
        variable: &str,
        default: StateValue,
    ) -> Result<StateValue, StorageError> {
        Ok(self.read(pk, variable).await?.unwrap_or(default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_broker::adapter::BrokerAdapter;
    use gs_broker::memory::MemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_db() -> sled::Db {
        let dir = tempfile::tempdir().unwrap();
        sled::open(dir.path()).unwrap()
    }

    #[tokio::test]
    async fn writes_non_memory_only_variables_and_skips_the_rest() {
        let db = test_db().await;
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let stream = Stream::bind(broker, "entities", 1).await.unwrap();
        let storage = StreamStorage::bind(
            &db,
            "entities",
            &stream,
            "storage",
            |name| name == "transient_v",
            None,
            None,
            false,
        )
        .await
        .unwrap();

        let mut changed = ChangeMap::new();
        changed.insert("public_v".to_string(), StateValue::from("x"));
        changed.insert("transient_v".to_string(), StateValue::from("y"));
        stream
            .upsert(b"e1".to_vec(), changed, Headers::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(
            storage.read(b"e1", "public_v").await.unwrap(),
            Some(StateValue::from("x"))
        );
        assert_eq!(storage.read(b"e1", "transient_v").await.unwrap(), None);
    }

    #[tokio::test]
    async fn downstream_observer_fires_after_write() {
        let db = test_db().await;
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let stream = Stream::bind(broker, "entities2", 1).await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let downstream: StreamObserverFn = Arc::new(move |_pk, _changed, _headers| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let _storage = StreamStorage::bind(
            &db,
            "entities2",
            &stream,
            "storage",
            |_| false,
            None,
            Some(downstream),
            false,
        )
        .await
        .unwrap();

        let mut changed = ChangeMap::new();
        changed.insert("v".to_string(), StateValue::from("x"));
        stream
            .upsert(b"e1".to_vec(), changed, Headers::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
