//! # gs-rpc
//!
//! Request/response RPC layered on the same log transport as the rest of
//! the runtime. Grounded in the original framework's `stream_rpc.py`
//! (`RPCEndPoint`, `RPCReqMessage`/`RPCRespMessage`,
//! `RPCEndPointServiceUnit._on_rpc_call`, `RPCCaller`/`RPCStub`'s
//! timeout-then-cleanup logic) and the `samples/rpc_sample.py` `DoAdd`
//! provider.

pub mod error;

use async_trait::async_trait;
use error::{RPCRemoteError, RPCTimeout, RpcError};
use gs_broker::adapter::{BrokerAdapter, Headers, RawRecord};
use gs_core::value::StateValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub use error::{RPCRemoteError as RemoteError, RPCTimeout as Timeout, RpcError};

/// Identifies an RPC target: either a specific instance by primary key, or
/// a class-level handler by name. Exactly one variant is ever used for a
/// given provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Endpoint {
    Instance(Vec<u8>),
    Class(String),
}

impl Endpoint {
    fn key_bytes(&self) -> Vec<u8> {
        match self {
            Endpoint::Instance(pk) => pk.clone(),
            Endpoint::Class(name) => name.clone().into_bytes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcRequest {
    call_id: Uuid,
    endpoint: Endpoint,
    response_topic: String,
    method: String,
    args: StateValue,
    keyword_args: StateValue,
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcResponse {
    call_id: Uuid,
    result: Result<StateValue, String>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RpcError> {
    bincode::serialize(value).map_err(|e| RpcError::Wire(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, RpcError> {
    bincode::deserialize(bytes).map_err(|e| RpcError::Wire(e.to_string()))
}

/// Implemented by whatever type backs an RPC-callable endpoint. Rust has no
/// reflection-based "call method by name", so the callee-side service
/// matches on `method` internally, the same effect as the source's
/// `getattr(provider, method_name)`. `args` carries positional arguments
/// (`StateValue::List`) and `keyword_args` named ones (`StateValue::Map`),
/// mirroring the source's `RPCReq.args`/`RPCReq.kwargs` pair.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn call(
        &self,
        method: &str,
        args: StateValue,
        keyword_args: StateValue,
    ) -> Result<StateValue, String>;
}

/// Binds a provider to a callee topic and answers requests addressed to
/// `endpoint`. Requests addressed elsewhere on the same topic are ignored
/// (a topic may be shared by several endpoints' request/response pairs).
pub async fn serve<P: RpcProvider + 'static>(
    broker: Arc<dyn BrokerAdapter>,
    callee_topic: &str,
    endpoint: Endpoint,
    provider: Arc<P>,
) -> Result<(), RpcError> {
    broker.ensure_topic(callee_topic, 1).await?;
    let topic = callee_topic.to_string();
    let broker_for_response = broker.clone();

    let observer: gs_broker::adapter::ObserverFn = Arc::new(move |record: RawRecord| {
        let endpoint = endpoint.clone();
        let provider = provider.clone();
        let broker = broker_for_response.clone();
        let topic = topic.clone();
        Box::pin(async move {
            let request: RpcRequest = decode(&record.value)?;
            if request.endpoint != endpoint {
                return Ok(());
            }
            let result = provider
                .call(&request.method, request.args, request.keyword_args)
                .await;
            let response = RpcResponse {
                call_id: request.call_id,
                result,
            };
            let key = request.endpoint.key_bytes();
            let value = encode(&response)?;
            broker
                .produce(&request.response_topic, key, value, Headers::new())
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            tracing::debug!(topic = %topic, call_id = %response.call_id, "answered rpc call");
            Ok(())
        })
    });

    broker.subscribe(callee_topic, "rpc-callee", observer).await?;
    Ok(())
}

type PendingMap = Mutex<HashMap<Uuid, oneshot::Sender<Result<StateValue, String>>>>;

/// The caller side: binds a response topic and correlates outstanding calls
/// by UUID. One `RpcCaller` can issue calls to many different callee
/// endpoints as long as they all answer on this caller's response topic.
pub struct RpcCaller {
    broker: Arc<dyn BrokerAdapter>,
    response_topic: String,
    pending: PendingMap,
}

impl RpcCaller {
    pub async fn bind(
        broker: Arc<dyn BrokerAdapter>,
        response_topic: impl Into<String>,
    ) -> Result<Arc<Self>, RpcError> {
        let response_topic = response_topic.into();
        broker.ensure_topic(&response_topic, 1).await?;
        let caller = Arc::new(RpcCaller {
            broker: broker.clone(),
            response_topic: response_topic.clone(),
            pending: Mutex::new(HashMap::new()),
        });

        let caller_for_observer = caller.clone();
        let observer: gs_broker::adapter::ObserverFn = Arc::new(move |record: RawRecord| {
            let caller = caller_for_observer.clone();
            Box::pin(async move {
                let response: RpcResponse = decode(&record.value)?;
                let sender = caller
                    .pending
                    .lock()
                    .expect("rpc caller mutex poisoned")
                    .remove(&response.call_id);
                if let Some(sender) = sender {
                    // A late response after the waiter already timed out
                    // finds no entry here and is dropped, matching the
                    // source's timeout-then-cleanup contract.
                    let _ = sender.send(response.result);
                }
                Ok(())
            })
        });
        broker
            .subscribe(&response_topic, "rpc-caller", observer)
            .await?;
        Ok(caller)
    }

    /// Call `method` on `endpoint` (reached via `callee_topic`) with
    /// positional `args` and `keyword_args`, waiting up to `timeout` for a
    /// response.
    pub async fn call(
        &self,
        callee_topic: &str,
        endpoint: Endpoint,
        method: &str,
        args: StateValue,
        keyword_args: StateValue,
        timeout: Duration,
    ) -> Result<StateValue, RpcError> {
        let call_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("rpc caller mutex poisoned")
            .insert(call_id, tx);

        let request = RpcRequest {
            call_id,
            endpoint: endpoint.clone(),
            response_topic: self.response_topic.clone(),
            method: method.to_string(),
            args,
            keyword_args,
        };
        let key = endpoint.key_bytes();
        let value = encode(&request)?;
        self.broker
            .produce(callee_topic, key, value, Headers::new())
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(trace))) => Err(RpcError::Remote(RPCRemoteError { trace })),
            Ok(Err(_dropped)) => Err(RpcError::Wire("response sender dropped".into())),
            Err(_elapsed) => {
                self.pending
                    .lock()
                    .expect("rpc caller mutex poisoned")
                    .remove(&call_id);
                Err(RpcError::Timeout(RPCTimeout))
            }
        }
    }
}
