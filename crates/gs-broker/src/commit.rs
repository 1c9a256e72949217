//! The commit operation: snapshot an entity's dirty set, partition it by
//! visibility, and emit at most one record per target stream.

use crate::error::TransportError;
use crate::stream::Stream;
use gs_core::state_variable::{is_private, EntityInstance};
use gs_core::value::ChangeMap;
use std::collections::BTreeMap;

/// Commit `entity`'s dirty set. If `saving_stream` is `None` or points at
/// the same topic as `publishing_stream`, every dirty variable goes to
/// `publishing_stream` in one record. Otherwise variables whose last
/// dot-separated segment starts with `_` go to `saving_stream` and the rest
/// go to `publishing_stream`; both records, if non-empty, are produced
/// concurrently.
pub async fn commit(
    entity: &mut EntityInstance,
    publishing_stream: &Stream,
    saving_stream: Option<&Stream>,
) -> Result<(), TransportError> {
    let dirty = entity.drain_dirty();
    if dirty.is_empty() {
        return Ok(());
    }
    let pk = entity.pk().to_vec();

    let same_stream = saving_stream
        .map(|s| s.topic() == publishing_stream.topic())
        .unwrap_or(true);

    if same_stream {
        return publishing_stream
            .upsert(pk, dirty, BTreeMap::new())
            .await;
    }

    let saving_stream = saving_stream.expect("checked above");
    let mut publish: ChangeMap = ChangeMap::new();
    let mut save: ChangeMap = ChangeMap::new();
    for (name, value) in dirty {
        if is_private(&name) {
            save.insert(name, value);
        } else {
            publish.insert(name, value);
        }
    }

    let publish_fut = async {
        if publish.is_empty() {
            Ok(())
        } else {
            publishing_stream
                .upsert(pk.clone(), publish, BTreeMap::new())
                .await
        }
    };
    let save_fut = async {
        if save.is_empty() {
            Ok(())
        } else {
            saving_stream.upsert(pk, save, BTreeMap::new()).await
        }
    };
    let (p, s) = tokio::try_join!(publish_fut, save_fut)?;
    let _ = (p, s);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::BrokerAdapter;
    use crate::memory::MemoryBroker;
    use gs_core::state_variable::{SchemaBuilder, StateSchema, StateVarDescriptor};
    use gs_core::value::StateValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Entity;
    impl StateSchema for Entity {
        fn descriptors() -> Vec<StateVarDescriptor> {
            let mut b = SchemaBuilder::new();
            b.var(StateVarDescriptor::new("public_v", StateValue::Null));
            b.var(StateVarDescriptor::new("_private_v", StateValue::Null));
            b.build()
        }
    }

    #[tokio::test]
    async fn visibility_split_routes_private_vars_to_saving_stream() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let publishing = Stream::bind(broker.clone(), "pub", 1).await.unwrap();
        let saving = Stream::bind(broker.clone(), "save", 1).await.unwrap();

        let pub_seen = Arc::new(AtomicUsize::new(0));
        let save_seen = Arc::new(AtomicUsize::new(0));
        let pub_seen2 = pub_seen.clone();
        publishing
            .observe(
                "role",
                Arc::new(move |_pk, changed, _h| {
                    let pub_seen = pub_seen2.clone();
                    Box::pin(async move {
                        assert!(changed.contains_key("public_v"));
                        assert!(!changed.contains_key("_private_v"));
                        pub_seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();
        let save_seen2 = save_seen.clone();
        saving
            .observe(
                "role",
                Arc::new(move |_pk, changed, _h| {
                    let save_seen = save_seen2.clone();
                    Box::pin(async move {
                        assert!(changed.contains_key("_private_v"));
                        save_seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        let mut entity = EntityInstance::new(b"e1".to_vec(), Entity::descriptors());
        entity.set("public_v", StateValue::from("x"));
        entity.set("_private_v", StateValue::from("y"));
        commit(&mut entity, &publishing, Some(&saving)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(pub_seen.load(Ordering::SeqCst), 1);
        assert_eq!(save_seen.load(Ordering::SeqCst), 1);
    }
}
