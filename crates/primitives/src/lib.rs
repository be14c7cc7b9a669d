//! Shared primitives for the supervisor / validator block pipeline
//!
//! This crate contains everything both roles must agree on bit-for-bit:
//! - Hashing and the binary Merkle tree used to commit to transaction batches
//! - Signing identities (ed25519 and secp256k1)
//! - Transaction, child block, base block and validator types

pub mod block;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod transaction;
pub mod tx_batch;
pub mod validator;

pub use block::{BaseBlock, BaseHeader, ChildBlock, ChildHeader, VoteCommit, VoteInfo};
pub use crypto::{Address, KeyKind, PrivKey, PubKey};
pub use error::{CodecError, CryptoError, ProofError};
pub use hash::{Hash, ZERO_HASH};
pub use merkle::Proof;
pub use transaction::SignedTransaction;
pub use tx_batch::{TxBatch, TxProof};
pub use validator::{Validator, ValidatorGroup};

/// Number of transactions in a full shard
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Placeholder staking power assigned to every validator
pub const DEFAULT_STAKING_POWER: i64 = 100;
