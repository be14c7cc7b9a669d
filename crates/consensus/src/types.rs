//! Core types for sharding, voting and the wire protocol

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use shard_primitives::{
    codec, Address, ChildBlock, CodecError, Hash, PubKey, SignedTransaction, VoteInfo,
    DEFAULT_BATCH_SIZE, DEFAULT_STAKING_POWER,
};

/// Domain tag prepended to the child block id before a vote is signed
const VOTE_DOMAIN: &[u8] = b"shard-vote:";

/// Domain tag prepended to the public key in the connection hello
const HELLO_DOMAIN: &[u8] = b"shard-hello:";

/// Bytes a validator signs to vote for `block_id`
pub fn vote_sign_bytes(block_id: &Hash) -> Vec<u8> {
    [VOTE_DOMAIN, block_id.as_slice()].concat()
}

/// Bytes a node signs to prove it owns `pub_key` when connecting
pub fn hello_sign_bytes(pub_key: &PubKey) -> Vec<u8> {
    [HELLO_DOMAIN, pub_key.bytes()].concat()
}

/// A child block travelling to a validator, or coming back with its vote
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChildBlockMessage {
    pub block: ChildBlock,
    pub vote: Option<VoteInfo>,
}

impl ChildBlockMessage {
    pub fn new(block: ChildBlock) -> Self {
        Self { block, vote: None }
    }
}

/// Key for handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Hello,
    PeerConnected,
    PeerDisconnected,
    Transaction,
    ChildBlock,
    Vote,
    Heartbeat,
}

/// Message types exchanged between supervisor, validators and clients
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    /// First frame on every connection, in both directions
    Hello {
        pub_key: PubKey,
        role: NodeRole,
        signature: Vec<u8>,
    },

    /// Raised locally by a transport once a validator's hello checks out
    PeerConnected { pub_key: PubKey },

    /// Raised locally by a transport when a validator's connection drops
    PeerDisconnected { address: Address },

    /// Client submitting a transaction to the supervisor
    Transaction(SignedTransaction),

    /// Supervisor shipping a shard to one validator
    ChildBlock(ChildBlockMessage),

    /// Validator returning the shard with its vote attached
    Vote(ChildBlockMessage),

    /// Keep-alive carrying the supervisor's latest height
    Heartbeat { height: u64 },
}

impl ConsensusMessage {
    pub fn opcode(&self) -> Opcode {
        match self {
            ConsensusMessage::Hello { .. } => Opcode::Hello,
            ConsensusMessage::PeerConnected { .. } => Opcode::PeerConnected,
            ConsensusMessage::PeerDisconnected { .. } => Opcode::PeerDisconnected,
            ConsensusMessage::Transaction(_) => Opcode::Transaction,
            ConsensusMessage::ChildBlock(_) => Opcode::ChildBlock,
            ConsensusMessage::Vote(_) => Opcode::Vote,
            ConsensusMessage::Heartbeat { .. } => Opcode::Heartbeat,
        }
    }

    /// Local notifications never travel between nodes
    pub fn is_local_only(&self) -> bool {
        matches!(
            self,
            ConsensusMessage::PeerConnected { .. } | ConsensusMessage::PeerDisconnected { .. }
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        codec::decode(data)
    }
}

/// Node role in the network
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Shards transactions and assembles base blocks
    Supervisor,
    /// Verifies shards and votes
    Validator,
    /// Only submits transactions
    Client,
}

/// Configuration shared by both roles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Transactions per child block; the supervisor cuts batches with it
    /// and validators reject larger blocks
    pub batch_size: usize,
    /// Power given to every validator the supervisor admits
    pub staking_power: i64,
    /// Interval between production ticks
    pub block_time_ms: u64,
    /// Pending transactions the mempool holds before refusing more
    pub mempool_capacity: usize,
    /// Assemble base blocks even when no child block is pending
    pub create_empty_blocks: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            staking_power: DEFAULT_STAKING_POWER,
            block_time_ms: 1000,
            mempool_capacity: 100_000,
            create_empty_blocks: false,
        }
    }
}

/// Stats about the consensus network
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsensusStats {
    pub current_height: u64,
    pub connected_validators: usize,
    pub pending_child_blocks: usize,
    pub child_blocks_created: u64,
    pub txs_sharded: u64,
    pub votes_received: u64,
    pub votes_rejected: u64,
    pub base_blocks_assembled: u64,
    pub batches_verified: u64,
    pub batches_rejected: u64,
}
