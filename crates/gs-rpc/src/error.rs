//! Error taxonomy for `gs-rpc`.

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("remote call failed: {0}")]
    Remote(#[from] RPCRemoteError),

    #[error("call timed out waiting for a response")]
    Timeout(#[from] RPCTimeout),

    #[error("transport failure: {0}")]
    Transport(#[from] gs_broker::TransportError),

    #[error("failed to encode/decode an RPC message: {0}")]
    Wire(String),
}

/// The callee raised an exception; its string trace is carried verbatim,
/// matching the source's serialize-exception-to-string behavior.
#[derive(Debug, thiserror::Error)]
#[error("{trace}")]
pub struct RPCRemoteError {
    pub trace: String,
}

#[derive(Debug, thiserror::Error)]
#[error("no response within the deadline")]
pub struct RPCTimeout;
