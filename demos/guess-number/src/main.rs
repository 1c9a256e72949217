//! Guess-the-number: an `Env` picks a hidden number in `[1, 100]`; an
//! `Agent` binary-searches it by reacting to the env's `state` signal
//! (`-1` too low, `0` blind, `1` too high). Two in-process entities, two
//! streams on a shared in-memory broker, wired through one
//! [`gs_dispatch::ChangeDispatcher`].
//!
//! Grounded in the original framework's `samples/guess_number.py`
//! (`GuessNumberGameEnv`, `GuessNumberAgent`): the `active`-flag reset
//! handler, the action/state/reward exchange, and the agent's
//! narrowing-bounds rule all follow that sample. The env's `lower_bound`
//! and `upper_bound` replace the sample's single `NumberRange` tuple,
//! since `StateValue` has no tuple variant; they are flattened fields of
//! the env's schema instead.

use gs_broker::adapter::BrokerAdapter;
use gs_broker::commit::commit;
use gs_broker::memory::MemoryBroker;
use gs_broker::stream::Stream;
use gs_core::state_variable::{EntityInstance, SchemaBuilder, StateSchema, StateVarDescriptor};
use gs_core::value::StateValue;
use gs_dispatch::ChangeDispatcher;
use gs_host::ServiceHost;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct EnvSchema;
impl StateSchema for EnvSchema {
    fn descriptors() -> Vec<StateVarDescriptor> {
        let mut b = SchemaBuilder::new();
        b.var(StateVarDescriptor::new("lower_bound", StateValue::Int(1)).always_dirty());
        b.var(StateVarDescriptor::new("upper_bound", StateValue::Int(100)).always_dirty());
        b.var(StateVarDescriptor::new("state", StateValue::Int(0)).always_dirty());
        b.var(StateVarDescriptor::new("reward", StateValue::Float(0.0)).always_dirty());
        b.build()
    }
}

struct AgentSchema;
impl StateSchema for AgentSchema {
    fn descriptors() -> Vec<StateVarDescriptor> {
        let mut b = SchemaBuilder::new();
        b.var(StateVarDescriptor::new("action", StateValue::Int(0)).always_dirty());
        // Private bookkeeping mirrors of the env's current guessing range;
        // not part of the agent's public contract, so they never leave
        // this process on their own. `gs_broker::commit` would route them
        // to a `saving_stream` rather than `publishing_stream` were one
        // configured.
        b.var(StateVarDescriptor::new("_lower_bound_hint", StateValue::Int(0)).memory_only());
        b.var(StateVarDescriptor::new("_upper_bound_hint", StateValue::Int(1000)).memory_only());
        b.build()
    }
}

struct EnvWorld {
    entity: EntityInstance,
    real_num: i64,
}

struct AgentWorld {
    entity: EntityInstance,
}

fn random_int(lo: i64, hi: i64) -> i64 {
    rand::thread_rng().gen_range(lo..=hi)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());
    let env_stream = Stream::bind(broker.clone(), "env-stream", 1).await?;
    let agent_stream = Stream::bind(broker.clone(), "agent-stream", 1).await?;

    let env_world = Arc::new(Mutex::new(EnvWorld {
        entity: EntityInstance::new(b"env-1".to_vec(), EnvSchema::descriptors()),
        real_num: 0,
    }));
    let agent_world = Arc::new(Mutex::new(AgentWorld {
        entity: EntityInstance::new(b"agent-1".to_vec(), AgentSchema::descriptors()),
    }));
    let done = Arc::new(Notify::new());

    let dispatcher = Arc::new(ChangeDispatcher::new());

    // Env: on `active` going to 1, start a new episode.
    {
        let env_world = env_world.clone();
        let env_stream = env_stream.clone();
        dispatcher.subscribe("env.on_active", "self", &["active"], Arc::new(move |_pk, changed, _triggering| {
            let env_world = env_world.clone();
            let env_stream = env_stream.clone();
            Box::pin(async move {
                if changed.get("active") != Some(&StateValue::Int(1)) {
                    return Ok(Vec::new());
                }
                let real_num = random_int(1, 100);
                let mut world = env_world.lock().await;
                world.real_num = real_num;
                world.entity.set("lower_bound", StateValue::Int(1));
                world.entity.set("upper_bound", StateValue::Int(100));
                world.entity.set("state", StateValue::Int(0));
                commit(&mut world.entity, &env_stream, None).await?;
                tracing::info!(real_num, "game start");
                Ok(Vec::new())
            })
        }));
    }

    // Env: react to the agent's guess.
    {
        let env_world = env_world.clone();
        let env_stream = env_stream.clone();
        let done = done.clone();
        dispatcher.subscribe("env.on_agent_action", "agent", &["action"], Arc::new(move |_pk, changed, _triggering| {
            let env_world = env_world.clone();
            let env_stream = env_stream.clone();
            let done = done.clone();
            Box::pin(async move {
                let Some(action) = changed.get("action").and_then(StateValue::as_int) else {
                    return Ok(Vec::new());
                };
                let mut world = env_world.lock().await;
                let real_num = world.real_num;
                if action == real_num {
                    world.entity.set("reward", StateValue::Float(1000.0));
                    tracing::info!(action, "bingo");
                    done.notify_one();
                } else if action > real_num {
                    world.entity.set("state", StateValue::Int(1));
                    world.entity.set("reward", StateValue::Float(-0.01));
                } else {
                    world.entity.set("state", StateValue::Int(-1));
                    world.entity.set("reward", StateValue::Float(-0.01));
                }
                commit(&mut world.entity, &env_stream, None).await?;
                Ok(Vec::new())
            })
        }));
    }

    // Agent: track the env's current guessing range.
    {
        let agent_world = agent_world.clone();
        dispatcher.subscribe("agent.on_bounds", "env", &["lower_bound", "upper_bound"], Arc::new(move |_pk, changed, _triggering| {
            let agent_world = agent_world.clone();
            Box::pin(async move {
                let mut world = agent_world.lock().await;
                if let Some(v) = changed.get("lower_bound").and_then(StateValue::as_int) {
                    world.entity.set("_lower_bound_hint", StateValue::Int(v));
                }
                if let Some(v) = changed.get("upper_bound").and_then(StateValue::as_int) {
                    world.entity.set("_upper_bound_hint", StateValue::Int(v));
                }
                Ok(Vec::new())
            })
        }));
    }

    // Agent: narrow the range and guess again on every state change.
    {
        let agent_world = agent_world.clone();
        let agent_stream = agent_stream.clone();
        dispatcher.subscribe("agent.on_state", "env", &["state"], Arc::new(move |_pk, changed, _triggering| {
            let agent_world = agent_world.clone();
            let agent_stream = agent_stream.clone();
            Box::pin(async move {
                let Some(state) = changed.get("state").and_then(StateValue::as_int) else {
                    return Ok(Vec::new());
                };
                let mut world = agent_world.lock().await;
                let prev_action = world.entity.get("action").and_then(StateValue::as_int).unwrap_or(0);
                let lower = world.entity.get("_lower_bound_hint").and_then(StateValue::as_int).unwrap_or(0);
                let upper = world.entity.get("_upper_bound_hint").and_then(StateValue::as_int).unwrap_or(1000);
                let (lower, upper) = match state.cmp(&0) {
                    std::cmp::Ordering::Greater => (lower, prev_action),
                    std::cmp::Ordering::Less => (prev_action, upper),
                    std::cmp::Ordering::Equal => (lower, upper),
                };
                world.entity.set("_lower_bound_hint", StateValue::Int(lower));
                world.entity.set("_upper_bound_hint", StateValue::Int(upper));
                let guess = if lower <= upper { random_int(lower, upper) } else { lower };
                world.entity.set("action", StateValue::Int(guess));
                commit(&mut world.entity, &agent_stream, None).await?;
                tracing::info!(lower, upper, guess, "agent guesses");
                Ok(Vec::new())
            })
        }));
    }

    // Agent: observe the env's reward signal; nothing to act on yet.
    dispatcher.subscribe("agent.on_reward", "env", &["reward"], Arc::new(move |_pk, changed, _triggering| {
        Box::pin(async move {
            if let Some(r) = changed.get("reward") {
                tracing::debug!(?r, "agent observed reward");
            }
            Ok(Vec::new())
        })
    }));

    // Feed env-stream records into the dispatcher under two source labels:
    // `"self"` for the host's own lifecycle convention, `"env"` for the
    // env's domain variables that the agent subscribed against.
    {
        let dispatcher = dispatcher.clone();
        env_stream
            .observe("dispatch-self", Arc::new(move |pk, changed, _h| {
                let dispatcher = dispatcher.clone();
                Box::pin(async move { dispatcher.dispatch("self", pk, changed).await.map_err(anyhow::Error::from) })
            }))
            .await?;
    }
    {
        let dispatcher = dispatcher.clone();
        env_stream
            .observe("dispatch-domain", Arc::new(move |pk, changed, _h| {
                let dispatcher = dispatcher.clone();
                Box::pin(async move { dispatcher.dispatch("env", pk, changed).await.map_err(anyhow::Error::from) })
            }))
            .await?;
    }
    {
        let dispatcher = dispatcher.clone();
        agent_stream
            .observe("dispatch-domain", Arc::new(move |pk, changed, _h| {
                let dispatcher = dispatcher.clone();
                Box::pin(async move { dispatcher.dispatch("agent", pk, changed).await.map_err(anyhow::Error::from) })
            }))
            .await?;
    }

    let host = ServiceHost::new("guess-number-env", env_stream.clone(), dispatcher.clone());
    host.start(None).await?;

    match tokio::time::timeout(Duration::from_secs(10), done.notified()).await {
        Ok(()) => tracing::info!("episode finished"),
        Err(_) => tracing::warn!("episode did not converge within the demo's time budget"),
    }
    host.stop().await?;
    Ok(())
}
