//! RPC-over-log demo: a `DoAdd` provider answers `add(a, b)` calls sent
//! over the shared broker, a caller drives a handful of calls and also
//! forces a timeout against a deliberately slow provider to exercise the
//! caller's cleanup-on-timeout path.
//!
//! Grounded in the original framework's `samples/rpc_sample.py` (`DoAdd`,
//! `RPCCallDoAddEnv`, `SimLocalEnv`'s periodic `rpc_stub.add` calls).

use async_trait::async_trait;
use gs_broker::adapter::BrokerAdapter;
use gs_broker::memory::MemoryBroker;
use gs_core::value::StateValue;
use gs_rpc::{serve, Endpoint, RpcCaller, RpcError, RpcProvider};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct DoAdd {
    name: String,
}

#[async_trait]
impl RpcProvider for DoAdd {
    async fn call(
        &self,
        method: &str,
        args: StateValue,
        _keyword_args: StateValue,
    ) -> Result<StateValue, String> {
        match method {
            "add" => {
                let StateValue::List(items) = args else {
                    return Err("expected a list of two numbers".to_string());
                };
                let [a, b] = items.as_slice() else {
                    return Err("expected exactly two arguments".to_string());
                };
                let (Some(a), Some(b)) = (a.as_int(), b.as_int()) else {
                    return Err("arguments must be numeric".to_string());
                };
                let sleep_secs = rand::thread_rng().gen_range(100..=1000) as f64 / 100.0;
                tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
                Ok(StateValue::Str(format!(
                    "[in '{}' slept {sleep_secs:.2}s] add: {a} + {b} = {}",
                    self.name.to_uppercase(),
                    a + b
                )))
            }
            other => Err(format!("no such method: {other}")),
        }
    }
}

struct SlowAdd;

#[async_trait]
impl RpcProvider for SlowAdd {
    async fn call(
        &self,
        _method: &str,
        _args: StateValue,
        _keyword_args: StateValue,
    ) -> Result<StateValue, String> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(StateValue::Int(0))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let broker: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::new());

    serve(
        broker.clone(),
        "do-add",
        Endpoint::Class("DoAdd".into()),
        Arc::new(DoAdd { name: "v1".into() }),
    )
    .await?;
    serve(
        broker.clone(),
        "slow-add",
        Endpoint::Class("Slow".into()),
        Arc::new(SlowAdd),
    )
    .await?;

    let caller = RpcCaller::bind(broker.clone(), "rpc-caller-responses").await?;

    for _ in 0..3 {
        let a = rand::thread_rng().gen_range(5..=1000);
        let b = rand::thread_rng().gen_range(5..=1000);
        let start = tokio::time::Instant::now();
        let result = caller
            .call(
                "do-add",
                Endpoint::Class("DoAdd".into()),
                "add",
                StateValue::List(vec![StateValue::Int(a), StateValue::Int(b)]),
                StateValue::Map(Default::default()),
                Duration::from_secs(5),
            )
            .await;
        match result {
            Ok(StateValue::Str(msg)) => {
                tracing::info!(elapsed = ?start.elapsed(), "rpc call result: {msg}");
            }
            Ok(other) => tracing::warn!(?other, "unexpected result shape"),
            Err(err) => tracing::error!(%err, "rpc call failed"),
        }
    }

    // Force a timeout: the callee takes 2s to answer but we only wait 200ms.
    // The late response must arrive after the waiter is gone and be dropped
    // rather than resolving a future nobody is polling anymore.
    match caller
        .call(
            "slow-add",
            Endpoint::Class("Slow".into()),
            "add",
            StateValue::Null,
            StateValue::Map(Default::default()),
            Duration::from_millis(200),
        )
        .await
    {
        Err(RpcError::Timeout(_)) => tracing::info!("slow-add call timed out as expected"),
        Ok(_) => tracing::warn!("slow-add call unexpectedly returned before timing out"),
        Err(other) => tracing::error!(%other, "unexpected error from slow-add call"),
    }

    // Give the late response a moment to arrive and be silently dropped.
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}
