//! Service host lifecycle: `Constructed -> Started -> Running -> Stopping ->
//! Stopped`, the `active` convention variable, and signal-chaining
//! graceful shutdown.
//!
//! Grounded in spec section 4.8 plus the original framework's
//! `activatable_stateful_service.py` (`Activatable`, `Env.start()` setting
//! `active.VALUE = 1` and committing, `install_terminate_handler`'s
//! signal-chaining behavior), since `service.py` itself was not retrieved
//! into the reference material. The CLI-facing wiring below follows this
//! workspace's own `CancellationToken::child_token` + YAML-spec-loading
//! idiom.

use crate::error::HostError;
use gs_broker::commit;
use gs_broker::stream::Stream;
use gs_core::state_variable::{EntityInstance, SchemaBuilder, StateSchema, StateVarDescriptor};
use gs_core::value::StateValue;
use gs_dispatch::ChangeDispatcher;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Constructed,
    Started,
    Running,
    Stopping,
    Stopped,
}

/// The convention schema every host's own stream carries: a single
/// `memory_only` `active` flag, set to 1 on start and 0 on terminate.
struct HostConvention;

impl StateSchema for HostConvention {
    fn descriptors() -> Vec<StateVarDescriptor> {
        let mut b = SchemaBuilder::new();
        b.var(StateVarDescriptor::new("active", StateValue::Int(0)).memory_only());
        b.build()
    }
}

/// A continuation to run after this host's own shutdown cleanup, modeling
/// the source's "delegate to any previously registered signal handler"
/// behavior.
pub type PriorHandler = Arc<dyn Fn() -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

pub struct ServiceHost {
    name: String,
    own_stream: Stream,
    dispatcher: Arc<ChangeDispatcher>,
    cancel: CancellationToken,
    state: Mutex<HostState>,
    entity: AsyncMutex<EntityInstance>,
}

impl ServiceHost {
    pub fn new(name: impl Into<String>, own_stream: Stream, dispatcher: Arc<ChangeDispatcher>) -> Arc<Self> {
        let name = name.into();
        let entity = EntityInstance::new(name.clone().into_bytes(), HostConvention::descriptors());
        Arc::new(ServiceHost {
            name,
            own_stream,
            dispatcher,
            cancel: CancellationToken::new(),
            state: Mutex::new(HostState::Constructed),
            entity: AsyncMutex::new(entity),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HostState {
        *self.state.lock().expect("host state mutex poisoned")
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn dispatcher(&self) -> Arc<ChangeDispatcher> {
        self.dispatcher.clone()
    }

    fn set_state(&self, state: HostState) {
        *self.state.lock().expect("host state mutex poisoned") = state;
    }

    async fn set_active_and_commit(&self, value: i64) -> Result<(), HostError> {
        let mut entity = self.entity.lock().await;
        entity.set("active", StateValue::Int(value));
        commit::commit(&mut entity, &self.own_stream, None).await?;
        Ok(())
    }

    /// Transitions Constructed -> Started -> Running, sets `active = 1` and
    /// commits it, then installs the termination-signal handler. `prior`,
    /// if given, runs after this host's own cleanup on shutdown, so an
    /// embedding application's previously registered handler still fires.
    pub async fn start(self: &Arc<Self>, prior: Option<PriorHandler>) -> Result<(), HostError> {
        if self.state() != HostState::Constructed {
            return Err(HostError::WrongState(self.state(), HostState::Constructed));
        }
        self.set_state(HostState::Started);
        self.set_active_and_commit(1).await?;
        self.set_state(HostState::Running);
        self.install_terminate_handler(prior);
        Ok(())
    }

    fn install_terminate_handler(self: &Arc<Self>, prior: Option<PriorHandler>) {
        let host = self.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            #[cfg(unix)]
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
                _ = host.cancel.cancelled() => return,
            }
            #[cfg(not(unix))]
            tokio::select! {
                _ = ctrl_c => {}
                _ = host.cancel.cancelled() => return,
            }

            if let Err(err) = host.stop().await {
                tracing::error!(host = %host.name, %err, "error during signal-triggered shutdown");
            }
            if let Some(prior) = prior {
                prior().await;
            }
        });
    }

    /// Transitions to Stopping, sets `active = 0` and commits it, cancels
    /// all scheduled work, then transitions to Stopped.
    pub async fn stop(&self) -> Result<(), HostError> {
        self.set_state(HostState::Stopping);
        self.set_active_and_commit(0).await?;
        self.cancel.cancel();
        self.set_state(HostState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_broker::adapter::BrokerAdapter;
    use gs_broker::memory::MemoryBroker;

    #[tokio::test]
    async fn start_transitions_to_running_and_commits_active_1() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let stream = Stream::bind(broker.clone(), "host-x", 1).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        stream
            .observe(
                "test",
                Arc::new(move |_pk, changed, _h| {
                    let seen = seen2.clone();
                    Box::pin(async move {
                        if let Some(v) = changed.get("active") {
                            seen.lock().unwrap().push(v.clone());
                        }
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        let dispatcher = Arc::new(ChangeDispatcher::new());
        let host = ServiceHost::new("host-x", stream, dispatcher);
        host.start(None).await.unwrap();
        assert_eq!(host.state(), HostState::Running);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[StateValue::Int(1)]);
    }

    #[tokio::test]
    async fn stop_commits_active_0_and_cancels_token() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let stream = Stream::bind(broker, "host-y", 1).await.unwrap();
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let host = ServiceHost::new("host-y", stream, dispatcher);
        host.start(None).await.unwrap();
        let token = host.cancellation_token();
        host.stop().await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn start_from_wrong_state_is_rejected() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
        let stream = Stream::bind(broker, "host-z", 1).await.unwrap();
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let host = ServiceHost::new("host-z", stream, dispatcher);
        host.start(None).await.unwrap();
        assert!(host.start(None).await.is_err());
    }
}
