//! Error taxonomy for `gs-core`.

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot decode an empty byte slice")]
    Empty,

    #[error("unknown envelope byte: {0}")]
    UnknownEnvelope(u8),

    #[error("encoding failure: {0}")]
    Encoding(String),

    #[error("compression failure: {0}")]
    Compression(String),
}
