//! Registry of `(source, variable) -> handlers`, alias expansion, fire-set
//! computation, and the `pick_one` single-variable adaptor.
//!
//! Grounded in the original framework's `state_var_change_dispatcher.py`
//! (`StateVarChangeDispatcher.on_state_var_changes`, the alias-expansion
//! regex, `pick_one_change`) and `handler.py`
//! (`process_handler_sync_result`'s commit-returned-pairs pattern). Rust has
//! no runtime introspection of decorated methods, so subscriptions are
//! registered imperatively at host-build time instead of discovered by
//! reflection; the resulting registry is the same shape.

use crate::error::DispatchError;
use gs_broker::commit;
use gs_broker::stream::Stream;
use gs_core::state_variable::{short_alias, EntityInstance};
use gs_core::value::ChangeMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One commit a handler wants performed after it returns.
pub struct PendingCommit {
    pub entity: EntityInstance,
    pub publishing_stream: Stream,
    pub saving_stream: Option<Stream>,
}

pub type HandlerFuture =
    futures::future::BoxFuture<'static, anyhow::Result<Vec<PendingCommit>>>;

/// A change handler: primary key, the full (alias-expanded) change map, and
/// the subset of that handler's subscribed variable names present in this
/// record, in subscription-declaration order.
pub type Handler = Arc<dyn Fn(Vec<u8>, ChangeMap, Vec<String>) -> HandlerFuture + Send + Sync>;

struct Subscription {
    name: String,
    vars: Vec<String>,
    handler: Handler,
}

#[derive(Default)]
pub struct ChangeDispatcher {
    next_id: AtomicUsize,
    subscriptions: Mutex<HashMap<usize, Subscription>>,
    /// (source, variable) -> handler ids, for fast fire-set lookup.
    index: Mutex<HashMap<(String, String), Vec<usize>>>,
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        ChangeDispatcher::default()
    }

    /// Subscribe `handler` to `vars` on `source`. `source` is `"self"` for
    /// the host's own stream, or the name of another bound stream/object
    /// reference/storage.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        source: &str,
        vars: &[&str],
        handler: Handler,
    ) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let vars: Vec<String> = vars.iter().map(|v| v.to_string()).collect();
        {
            let mut index = self.index.lock().expect("dispatcher mutex poisoned");
            for v in &vars {
                index
                    .entry((source.to_string(), v.clone()))
                    .or_default()
                    .push(id);
            }
        }
        self.subscriptions.lock().expect("dispatcher mutex poisoned").insert(
            id,
            Subscription {
                name: name.into(),
                vars,
                handler,
            },
        );
        id
    }

    /// Expand `changed` with short-name aliases: for `A.B.v`, also expose
    /// `v` if not already present. `ChangeMap` preserves the order its
    /// entries were set in, so when two fully-qualified names collapse to
    /// the same short alias, first-seen-wins resolves in that same order.
    fn expand_aliases(changed: &ChangeMap) -> ChangeMap {
        let mut expanded = changed.clone();
        for (name, value) in changed {
            if let Some(alias) = short_alias(name) {
                expanded.entry(alias.to_string()).or_insert_with(|| value.clone());
            }
        }
        expanded
    }

    /// Dispatch one incoming record from `source`. Every matching handler
    /// fires exactly once; its returned commits are applied before this
    /// call resolves.
    pub async fn dispatch(
        &self,
        source: &str,
        pk: Vec<u8>,
        changed: ChangeMap,
    ) -> Result<(), DispatchError> {
        let expanded = Self::expand_aliases(&changed);

        let fire_set: BTreeSet<usize> = {
            let index = self.index.lock().expect("dispatcher mutex poisoned");
            let mut ids = BTreeSet::new();
            for name in expanded.keys() {
                if let Some(handler_ids) = index.get(&(source.to_string(), name.clone())) {
                    ids.extend(handler_ids.iter().copied());
                }
            }
            ids
        };

        for id in fire_set {
            let (name, vars, handler) = {
                let subs = self.subscriptions.lock().expect("dispatcher mutex poisoned");
                let Some(sub) = subs.get(&id) else { continue };
                (sub.name.clone(), sub.vars.clone(), sub.handler.clone())
            };
            let triggering: Vec<String> = vars
                .into_iter()
                .filter(|v| expanded.contains_key(v))
                .collect();

            let fut = handler(pk.clone(), expanded.clone(), triggering);
            let joined = tokio::spawn(fut).await;
            let commits = match joined {
                Ok(Ok(commits)) => commits,
                Ok(Err(handler_err)) => {
                    let err = DispatchError::HandlerFailed { handler: name.clone(), source: handler_err };
                    tracing::error!(%err, "handler returned an error");
                    continue;
                }
                Err(join_err) => {
                    let err = DispatchError::HandlerPanicked {
                        handler: name.clone(),
                        source: anyhow::Error::from(join_err),
                    };
                    tracing::error!(%err, "handler panicked");
                    continue;
                }
            };
            for mut pending in commits {
                if let Err(err) = commit::commit(
                    &mut pending.entity,
                    &pending.publishing_stream,
                    pending.saving_stream.as_ref(),
                )
                .await
                {
                    tracing::error!(handler = %name, %err, "commit from handler result failed");
                }
            }
        }
        Ok(())
    }
}

/// Adapts a single-variable handler `(pk, name, value) -> commits` into a
/// full [`Handler`]: finds the first triggering variable (in subscription
/// order) whose value is non-default and invokes the inner handler with it.
/// If none is non-default, the adaptor is a no-op for this record.
pub fn pick_one<F>(inner: F) -> Handler
where
    F: Fn(Vec<u8>, String, gs_core::value::StateValue) -> HandlerFuture + Send + Sync + 'static,
{
    let inner = Arc::new(inner);
    Arc::new(move |pk: Vec<u8>, changed: ChangeMap, triggering: Vec<String>| {
        let inner = inner.clone();
        Box::pin(async move {
            for name in triggering {
                if let Some(value) = changed.get(&name) {
                    if !value.is_default() {
                        return inner(pk, name, value.clone()).await;
                    }
                }
            }
            Ok(Vec::new())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_core::value::StateValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_handler(calls: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_pk, _changed, _triggers| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
        })
    }

    #[tokio::test]
    async fn handler_fires_once_per_matching_record() {
        let dispatcher = ChangeDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe("h", "self", &["Author.name"], noop_handler(calls.clone()));

        let mut changed = ChangeMap::new();
        changed.insert("Author.name".to_string(), StateValue::from("Ada"));
        dispatcher
            .dispatch("self", b"u1".to_vec(), changed)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_alias_matches_subscription() {
        let dispatcher = ChangeDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe("h", "self", &["scholar_info"], noop_handler(calls.clone()));

        let mut changed = ChangeMap::new();
        changed.insert("Google.scholar_info".to_string(), StateValue::from("phd"));
        dispatcher
            .dispatch("self", b"u1".to_vec(), changed)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_with_multiple_matching_subscriptions_still_fires_once() {
        let dispatcher = ChangeDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = noop_handler(calls.clone());
        dispatcher.subscribe("h", "self", &["a", "b"], handler);

        let mut changed = ChangeMap::new();
        changed.insert("a".to_string(), StateValue::from("1"));
        changed.insert("b".to_string(), StateValue::from("2"));
        dispatcher
            .dispatch("self", b"u1".to_vec(), changed)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pick_one_selects_first_non_default_in_order() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let handler = pick_one(move |_pk, name, _value| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(name);
                Ok(Vec::new())
            })
        });

        let dispatcher = ChangeDispatcher::new();
        dispatcher.subscribe("h", "self", &["a", "b"], handler);

        let mut changed = ChangeMap::new();
        changed.insert("a".to_string(), StateValue::Null);
        changed.insert("b".to_string(), StateValue::from("set"));
        dispatcher
            .dispatch("self", b"u1".to_vec(), changed)
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &["b".to_string()]);
    }
}
