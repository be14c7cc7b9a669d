//! Consensus and transport errors

use crate::types::Opcode;
use shard_primitives::{Address, CodecError, CryptoError, ProofError};
use shard_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("batch is empty")]
    EmptyBatch,

    #[error("tx {index}: proof verification failed: {source}")]
    InvalidProof {
        index: usize,
        #[source]
        source: ProofError,
    },

    #[error("tx {index}: proof index is {found}")]
    ProofIndexMismatch { index: usize, found: u64 },

    #[error("tx {index}: proof total {found} does not match header count {expected}")]
    ProofTotalMismatch { index: usize, expected: u64, found: u64 },

    #[error("tx {index}: undecodable transaction: {reason}")]
    InvalidTransaction { index: usize, reason: String },

    #[error("tx {index}: bad signature")]
    InvalidSignature { index: usize },

    #[error("child block header rejected: {0}")]
    InvalidHeader(String),

    #[error("address {address} does not belong to the announced public key")]
    AddressMismatch { address: Address },

    #[error("validator {0} not found")]
    ValidatorNotFound(Address),

    #[error("vote rejected: {0}")]
    InvalidVote(String),

    #[error("child block {0} is not pending")]
    UnknownChildBlock(String),

    #[error("transaction rejected: {0}")]
    InvalidSubmission(String),

    #[error("mempool is full ({0} transactions)")]
    MempoolFull(usize),

    #[error("transaction {0} is already pending")]
    DuplicateTransaction(String),

    #[error("unexpected {0:?} message")]
    UnexpectedMessage(Opcode),
}

impl ConsensusError {
    /// Failures after which the block producer must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::Storage(err) if err.is_fatal())
    }
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("peer {0} is not connected")]
    UnknownPeer(Address),

    #[error("no handler registered for {0:?}")]
    NoHandler(Opcode),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed")]
    Closed,

    #[error("message encoding error: {0}")]
    Codec(#[from] CodecError),
}
