//! Error taxonomy for `gs-host`.

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host is in state {0:?}, expected {1:?}")]
    WrongState(crate::lifecycle::HostState, crate::lifecycle::HostState),

    #[error(transparent)]
    Transport(#[from] gs_broker::TransportError),

    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
