//! Shard Consensus - supervisor sharding with validator votes
//!
//! Architecture:
//! - One supervisor batches the mempool and ships one child block per validator
//! - Validators rebuild each block's Merkle proofs, check every signature and vote
//! - Every tick the supervisor folds child blocks and votes into a base block
//! - Transports only move [`ConsensusMessage`]s; a [`Dispatcher`] routes them by opcode

pub mod broadcast;
pub mod error;
pub mod handlers;
pub mod mempool;
pub mod network;
pub mod producer;
pub mod supervisor;
pub mod types;
pub mod validator;

#[cfg(test)]
mod tests;

pub use broadcast::{BroadcastClient, BroadcastServer};
pub use error::{ConsensusError, NetworkError};
pub use handlers::{SupervisorHandler, ValidatorHandler};
pub use mempool::MemPool;
pub use network::{Dispatcher, LocalHub, LocalNetwork, MessageHandler, Network};
pub use producer::{BlockProducer, BlockUpdate, ProducerHandle};
pub use supervisor::{Supervisor, SupervisorBuilder};
pub use types::*;
pub use validator::{verify_txs, ValidatorNode, ValidatorNodeBuilder};
