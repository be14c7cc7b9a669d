//! Borsh encoding helpers
//!
//! Borsh is the canonical byte form for everything that gets hashed or sent
//! between nodes, so encoding goes through these two functions only.

use crate::error::CodecError;
use borsh::{BorshDeserialize, BorshSerialize};

/// Encode a value to its canonical bytes
pub fn encode<T: BorshSerialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    borsh::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a value from its canonical bytes
pub fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, CodecError> {
    borsh::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
