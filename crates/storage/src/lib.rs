//! Storage for the shard chain
//!
//! This crate provides the two stores the block pipeline writes to:
//! - A block store mapping block ids (and a well-known "last block" key) to base blocks
//! - A key-value state store whose commit produces the state root for the next header
//!
//! Both are consumed through the [`BlockStore`] and [`StateStore`] traits so
//! the consensus crate never depends on a concrete engine.

pub mod error;
pub mod persistence;
pub mod state_store;

pub use error::StorageError;
pub use persistence::{ChainMetadata, PersistentStore, StateStorePersistence};
pub use state_store::{CommittedState, MemoryStateStore};

use shard_primitives::{BaseBlock, Hash};

/// Persistent mapping from block id to base block
pub trait BlockStore: Send + Sync {
    /// Most recently added block, `None` on an empty store
    fn last_block(&self) -> Result<Option<BaseBlock>, StorageError>;

    /// Append a block; it must extend the current last block
    fn add_base_block(&self, block: &BaseBlock) -> Result<(), StorageError>;

    fn block_by_hash(&self, block_id: &Hash) -> Result<Option<BaseBlock>, StorageError>;
}

/// Account state keyed by address hash
pub trait StateStore: Send + Sync {
    fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn try_update(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;

    /// Fix the current contents as the state after block `height` and return their root
    fn commit(&self, height: u64) -> Result<Hash, StorageError>;

    /// Height of the last commit or restored snapshot, `None` before either
    fn committed_height(&self) -> Option<u64>;
}
