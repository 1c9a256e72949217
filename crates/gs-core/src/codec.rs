//! Three-envelope self-describing codec.
//!
//! Envelope byte 1 selects how the remaining bytes decode:
//!
//! - [`Envelope::CompactSelfDescribed`]: `bincode` over [`StateValue`]. Used
//!   for structured values and anything under [`COMPRESSION_THRESHOLD`]
//!   bytes.
//! - [`Envelope::CompressedSelfDescribed`]: the same `bincode` payload, gzip
//!   compressed. Used when the compact form exceeds the threshold.
//! - [`Envelope::DenseColumnar`]: a raw byte run with no structural framing.
//!   Used for opaque [`StateValue::Bytes`] blobs already over the threshold,
//!   skipping the self-described wrapper entirely.
//!
//! Mirrors the tag-byte dispatch (`BIN_TYPE_PICKLE` / `BIN_TYPE_PICKLE_GZIP`
//! / `BIN_TYPE_ARROW`) and the 2048-byte threshold of the framework this
//! runtime is modeled on.

use crate::error::CodecError;
use crate::value::StateValue;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Above this many bytes, a compact encoding is compressed (or, for opaque
/// bytes, sent dense instead of self-described).
pub const COMPRESSION_THRESHOLD: usize = 2048;

#[repr(u8)]
enum Envelope {
    CompactSelfDescribed = 1,
    CompressedSelfDescribed = 2,
    DenseColumnar = 3,
}

impl Envelope {
    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            1 => Ok(Envelope::CompactSelfDescribed),
            2 => Ok(Envelope::CompressedSelfDescribed),
            3 => Ok(Envelope::DenseColumnar),
            other => Err(CodecError::UnknownEnvelope(other)),
        }
    }
}

/// Encode a value, choosing the envelope per the heuristic in the module docs.
pub fn encode(value: &StateValue) -> Result<Vec<u8>, CodecError> {
    if let StateValue::Bytes(raw) = value {
        if raw.len() > COMPRESSION_THRESHOLD {
            return Ok(encode_dense(raw));
        }
    }

    let compact = encode_compact(value)?;
    if compact.len() <= COMPRESSION_THRESHOLD {
        let mut out = Vec::with_capacity(compact.len() + 1);
        out.push(Envelope::CompactSelfDescribed as u8);
        out.extend_from_slice(&compact);
        return Ok(out);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&compact)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    let mut out = Vec::with_capacity(compressed.len() + 1);
    out.push(Envelope::CompressedSelfDescribed as u8);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<StateValue, CodecError> {
    let (tag, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    match Envelope::from_tag(*tag)? {
        Envelope::CompactSelfDescribed => decode_compact(body),
        Envelope::CompressedSelfDescribed => {
            let mut decoder = GzDecoder::new(body);
            let mut raw = Vec::new();
            decoder
                .read_to_end(&mut raw)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            decode_compact(&raw)
        }
        Envelope::DenseColumnar => Ok(StateValue::Bytes(body.to_vec())),
    }
}

fn encode_compact(value: &StateValue) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encoding(e.to_string()))
}

fn decode_compact(bytes: &[u8]) -> Result<StateValue, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Encoding(e.to_string()))
}

fn encode_dense(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 1);
    out.push(Envelope::DenseColumnar as u8);
    out.extend_from_slice(raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn round_trips_small_structured_value() {
        let v = StateValue::Str("Ada".into());
        let bytes = encode(&v).unwrap();
        assert_eq!(bytes[0], Envelope::CompactSelfDescribed as u8);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn round_trips_large_structured_value_compressed() {
        let mut map = IndexMap::new();
        map.insert("x".repeat(10), StateValue::Str("y".repeat(4000)));
        let v = StateValue::Map(map);
        let bytes = encode(&v).unwrap();
        assert_eq!(bytes[0], Envelope::CompressedSelfDescribed as u8);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn round_trips_large_opaque_bytes_densely() {
        let raw = vec![7u8; 4096];
        let v = StateValue::Bytes(raw.clone());
        let bytes = encode(&v).unwrap();
        assert_eq!(bytes[0], Envelope::DenseColumnar as u8);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn small_opaque_bytes_stay_self_described() {
        let v = StateValue::Bytes(vec![1, 2, 3]);
        let bytes = encode(&v).unwrap();
        assert_eq!(bytes[0], Envelope::CompactSelfDescribed as u8);
        assert_eq!(decode(&bytes).unwrap(), v);
    }

    #[test]
    fn unknown_envelope_byte_errors() {
        let err = decode(&[9, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownEnvelope(9)));
    }

    #[test]
    fn empty_input_errors() {
        assert!(matches!(decode(&[]).unwrap_err(), CodecError::Empty));
    }
}
