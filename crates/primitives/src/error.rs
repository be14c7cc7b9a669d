//! Primitive errors

use thiserror::Error;

/// Merkle proof failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("proof total must be positive")]
    EmptyTree,

    #[error("proof index {index} out of range for total {total}")]
    IndexOutOfRange { index: u64, total: u64 },

    #[error("proof trail has {actual} aunts, expected {expected}")]
    AuntCountMismatch { expected: usize, actual: usize },

    #[error("leaf hash does not match the proof")]
    LeafHashMismatch,

    #[error("data hash does not match the proof root")]
    DataHashMismatch,

    #[error("computed root {computed} does not match claimed root {claimed}")]
    RootMismatch { computed: String, claimed: String },
}

impl ProofError {
    /// True when the aunt trail is too long or too short for the leaf position
    pub fn is_trail_length(&self) -> bool {
        matches!(self, ProofError::AuntCountMismatch { .. })
    }
}

/// Key handling and signing failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("unknown key type: {0}")]
    UnknownKeyKind(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("signed message: {0}")]
    Codec(#[from] CodecError),
}

/// Canonical encoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}
