//! Child blocks, votes and base blocks
//!
//! A child block carries one shard of transactions and the Merkle root over
//! them. A base block is the chain's canonical block for a height and
//! aggregates every child block and the votes collected for it.
//!
//! Block ids are the hash of the borsh-encoded header with `block_id`
//! zeroed.

use crate::codec;
use crate::crypto::Address;
use crate::error::CodecError;
use crate::hash::{hash, Hash, ZERO_HASH};
use crate::tx_batch::TxBatch;
use crate::validator::Validator;
use borsh::{BorshDeserialize, BorshSerialize};

/// Header of a child block
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChildHeader {
    /// Address of the supervisor that built the block
    pub supervisor_id: Address,
    /// Number of transactions in this block
    pub num_txs: u64,
    /// Running transaction count across this height's child blocks, including this one
    pub total_txs: u64,
    /// Merkle root of the block's transactions
    pub root_hash: Hash,
    /// Base block height this child block is built for
    pub height: u64,
    /// Id of the base block this height builds on
    pub last_block_id: Hash,
    /// Hash of this header with `block_id` zeroed
    pub block_id: Hash,
}

impl ChildHeader {
    pub fn compute_block_id(&self) -> Result<Hash, CodecError> {
        let mut unsealed = self.clone();
        unsealed.block_id = ZERO_HASH;
        Ok(hash(&codec::encode(&unsealed)?))
    }

    /// Compute and store the block id
    pub fn seal(&mut self) -> Result<Hash, CodecError> {
        self.block_id = self.compute_block_id()?;
        Ok(self.block_id)
    }
}

/// One shard of transactions
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChildBlock {
    pub header: ChildHeader,
    /// Serialized transactions, in Merkle order
    pub txs: Vec<Vec<u8>>,
}

impl ChildBlock {
    pub fn block_id(&self) -> Hash {
        self.header.block_id
    }

    pub fn tx_batch(&self) -> TxBatch {
        TxBatch::new(self.txs.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

/// A validator's vote on a child block
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteInfo {
    pub validator: Validator,
    pub signature: Vec<u8>,
    pub signed_current_block: bool,
}

/// Votes collected for one child block
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteCommit {
    pub block_id: Hash,
    pub votes: Vec<VoteInfo>,
}

/// Header of a base block
///
/// Merkle roots over empty inputs are stored as `None`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BaseHeader {
    /// Unix time in milliseconds
    pub time: i64,
    pub height: u64,
    pub block_id: Hash,
    pub last_block_id: Hash,
    pub validator_group_hash: Option<Hash>,
    pub next_validator_group_hash: Option<Hash>,
    /// Merkle root over the serialized child blocks
    pub child_block_hash: Option<Hash>,
    /// Hash of the serialized vote commits
    pub last_vote_hash: Hash,
    pub state_root: Hash,
}

impl BaseHeader {
    pub fn compute_block_id(&self) -> Result<Hash, CodecError> {
        let mut unsealed = self.clone();
        unsealed.block_id = ZERO_HASH;
        Ok(hash(&codec::encode(&unsealed)?))
    }

    pub fn seal(&mut self) -> Result<Hash, CodecError> {
        self.block_id = self.compute_block_id()?;
        Ok(self.block_id)
    }
}

/// The chain's canonical block
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BaseBlock {
    pub header: BaseHeader,
    /// Borsh `Vec<ChildBlock>`
    pub child_blocks: Vec<u8>,
    /// Borsh `Vec<VoteCommit>`
    pub vote_commits: Vec<u8>,
    /// Borsh `Vec<Validator>`
    pub validators: Vec<u8>,
    /// Borsh `Vec<Validator>`
    pub next_validators: Vec<u8>,
}

impl BaseBlock {
    /// Height-0 block every chain starts from
    pub fn genesis() -> Result<Self, CodecError> {
        let empty_children: Vec<ChildBlock> = Vec::new();
        let empty_commits: Vec<VoteCommit> = Vec::new();
        let empty_validators: Vec<Validator> = Vec::new();
        let vote_commits = codec::encode(&empty_commits)?;
        let validators = codec::encode(&empty_validators)?;

        let mut header = BaseHeader {
            time: 0,
            height: 0,
            block_id: ZERO_HASH,
            last_block_id: ZERO_HASH,
            validator_group_hash: None,
            next_validator_group_hash: None,
            child_block_hash: None,
            last_vote_hash: hash(&vote_commits),
            state_root: ZERO_HASH,
        };
        header.seal()?;

        Ok(Self {
            header,
            child_blocks: codec::encode(&empty_children)?,
            vote_commits,
            validators: validators.clone(),
            next_validators: validators,
        })
    }

    pub fn block_id(&self) -> Hash {
        self.header.block_id
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn decode_child_blocks(&self) -> Result<Vec<ChildBlock>, CodecError> {
        codec::decode(&self.child_blocks)
    }

    pub fn decode_vote_commits(&self) -> Result<Vec<VoteCommit>, CodecError> {
        codec::decode(&self.vote_commits)
    }

    pub fn decode_validators(&self) -> Result<Vec<Validator>, CodecError> {
        codec::decode(&self.validators)
    }

    pub fn decode_next_validators(&self) -> Result<Vec<Validator>, CodecError> {
        codec::decode(&self.next_validators)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}
