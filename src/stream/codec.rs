//! Payload encoding at the streaming boundary.
//!
//! Inbound payloads are raw little-endian `f32` sequences; the dimension is
//! the payload length divided by four. Outbound payloads carry the hash code
//! in one of two documented encodings, chosen once per deployment.

use serde::{Deserialize, Serialize};

use crate::error::{LshError, LshResult};
use crate::lsh::HashCode;

/// Number of bytes per encoded vector element.
pub const BYTES_PER_ELEMENT: usize = 4;

/// Decodes a vector payload.
///
/// Fails with `MalformedInput` for an empty payload or a length that is not
/// a multiple of four.
pub fn decode_vector(payload: &[u8]) -> LshResult<Vec<f32>> {
    if payload.is_empty() {
        return Err(LshError::MalformedInput {
            reason: "empty vector payload".to_string(),
        });
    }
    if payload.len() % BYTES_PER_ELEMENT != 0 {
        return Err(LshError::MalformedInput {
            reason: format!(
                "payload of {} bytes is not a multiple of {BYTES_PER_ELEMENT}",
                payload.len()
            ),
        });
    }

    Ok(payload
        .chunks_exact(BYTES_PER_ELEMENT)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Encodes a vector as a little-endian `f32` payload.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Wire encoding of outbound hash codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashEncoding {
    /// One byte per bit, each `0` or `1`, in hyperplane order.
    #[default]
    BytePerBit,

    /// Eight bits per byte, most significant bit first; `ceil(bits / 8)`
    /// bytes with the last byte zero-padded.
    Packed,
}

impl HashEncoding {
    pub fn encode(&self, code: &HashCode) -> Vec<u8> {
        match self {
            Self::BytePerBit => code.as_bytes().to_vec(),
            Self::Packed => code.packed(),
        }
    }

    /// Encoded length of a `bits`-bit code.
    #[must_use]
    pub fn encoded_len(&self, bits: usize) -> usize {
        match self {
            Self::BytePerBit => bits,
            Self::Packed => bits.div_ceil(8),
        }
    }
}
