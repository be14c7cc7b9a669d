//! Storage errors

use shard_primitives::{CodecError, Hash};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("metadata encoding error: {0}")]
    Metadata(#[from] bincode::Error),

    #[error("block encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("stored data is corrupt: {0}")]
    Corruption(String),

    #[error("block at height {height} does not extend last block {expected:?}")]
    InvalidLink { height: u64, expected: Hash },
}

impl StorageError {
    /// Integrity failures after which the node must not keep producing blocks
    pub fn is_fatal(&self) -> bool {
        match self {
            StorageError::Database(err) => matches!(
                err,
                sled::Error::Corruption { .. } | sled::Error::Io(_) | sled::Error::ReportableBug(_)
            ),
            StorageError::Corruption(_) => true,
            StorageError::Metadata(_)
            | StorageError::Codec(_)
            | StorageError::InvalidLink { .. } => false,
        }
    }
}
