//! Embedding vector serialization — little-endian f32 bytes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("embedding blob length {0} is not a multiple of 4")]
    InvalidLength(usize),
}

/// Serialize an embedding vector to little-endian f32 bytes.
pub fn vector_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian f32 bytes back into an embedding vector.
pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError::InvalidLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
