//! Persistence Layer for the shard chain
//!
//! Uses sled embedded database to persist base blocks and state snapshots
//! across restarts. Blocks are written as they are committed; the state
//! snapshot is saved periodically and on shutdown.

use crate::error::StorageError;
use crate::{BlockStore, StateStore};
use serde::{Deserialize, Serialize};
use shard_primitives::{BaseBlock, Hash};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::Db;
use std::path::Path;

/// Metadata key holding the chain summary
const CHAIN_KEY: &str = "chain";

/// Well-known key holding the id of the last block
const LAST_BLOCK_KEY: &str = "last_block";

/// Metadata key holding the height of the saved state snapshot
const STATE_HEIGHT_KEY: &str = "state_height";

/// Metadata about the chain state
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChainMetadata {
    /// Height of the last block
    pub height: u64,
    /// Id of the last block
    pub block_id: [u8; 32],
    /// Total blocks stored
    pub block_count: u64,
    /// Last save timestamp
    pub last_save_ts: i64,
}

/// Persistent storage for blocks and state snapshots
pub struct PersistentStore {
    /// Sled database instance
    db: Db,
    /// Block id -> borsh base block
    blocks: sled::Tree,
    /// Big-endian height -> block id
    heights: sled::Tree,
    /// State snapshot entries
    state: sled::Tree,
    /// Metadata tree
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(&path)?;
        tracing::info!("Opened persistent store at {:?}", path.as_ref());
        Self::from_db(db)
    }

    /// Store that lives only as long as the process
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let heights = db.open_tree("heights")?;
        let state = db.open_tree("state")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            heights,
            state,
            metadata,
        })
    }

    fn decode_block(bytes: &[u8]) -> Result<BaseBlock, StorageError> {
        BaseBlock::from_bytes(bytes)
            .map_err(|e| StorageError::Corruption(format!("undecodable block: {}", e)))
    }

    /// Get the block at `height`
    pub fn block_by_height(&self, height: u64) -> Result<Option<BaseBlock>, StorageError> {
        let Some(id) = self.heights.get(height.to_be_bytes())? else {
            return Ok(None);
        };
        let id: Hash = id
            .as_ref()
            .try_into()
            .map_err(|_| StorageError::Corruption(format!("bad block id at height {}", height)))?;
        self.block_by_hash(&id)
    }

    /// Save chain metadata
    pub fn save_metadata(&self, metadata: &ChainMetadata) -> Result<(), StorageError> {
        let bytes = bincode::serialize(metadata)?;
        self.metadata.insert(CHAIN_KEY, bytes)?;
        Ok(())
    }

    /// Load chain metadata
    pub fn load_metadata(&self) -> Result<Option<ChainMetadata>, StorageError> {
        match self.metadata.get(CHAIN_KEY)? {
            Some(bytes) => {
                let metadata: ChainMetadata = bincode::deserialize(&bytes)?;
                Ok(Some(metadata))
            }
            None => Ok(None),
        }
    }

    /// Replace the state snapshot with `entries`, taken after block `height`
    ///
    /// Entries and height are written in one transaction, so a crash leaves
    /// either the old snapshot or the new one.
    pub fn store_state_snapshot(
        &self,
        height: u64,
        entries: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), StorageError> {
        (&self.state, &self.metadata)
            .transaction(|(state, metadata)| {
                for (key, value) in entries {
                    state.insert(key.as_slice(), value.as_slice())?;
                }
                metadata.insert(STATE_HEIGHT_KEY, &height.to_be_bytes()[..])?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => {
                    StorageError::Corruption("state snapshot aborted".to_string())
                }
                TransactionError::Storage(e) => StorageError::Database(e),
            })?;
        self.flush()
    }

    /// Height the saved state snapshot belongs to
    pub fn state_height(&self) -> Result<Option<u64>, StorageError> {
        let Some(bytes) = self.metadata.get(STATE_HEIGHT_KEY)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| StorageError::Corruption("bad state snapshot height".to_string()))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    /// Get all state entries (for loading into memory)
    pub fn get_all_state(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        for result in self.state.iter() {
            let (key, value) = result?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl BlockStore for PersistentStore {
    fn last_block(&self) -> Result<Option<BaseBlock>, StorageError> {
        let Some(id) = self.metadata.get(LAST_BLOCK_KEY)? else {
            return Ok(None);
        };
        let id: Hash = id
            .as_ref()
            .try_into()
            .map_err(|_| StorageError::Corruption("bad last block id".to_string()))?;

        match self.block_by_hash(&id)? {
            Some(block) => Ok(Some(block)),
            None => Err(StorageError::Corruption(format!(
                "last block {} is missing",
                hex_prefix(&id)
            ))),
        }
    }

    fn add_base_block(&self, block: &BaseBlock) -> Result<(), StorageError> {
        if let Some(last) = self.last_block()? {
            if block.header.last_block_id != last.block_id()
                || block.height() != last.height() + 1
            {
                return Err(StorageError::InvalidLink {
                    height: block.height(),
                    expected: last.block_id(),
                });
            }
        }

        let id = block.block_id();
        self.blocks.insert(id, block.to_bytes()?)?;
        self.heights.insert(block.height().to_be_bytes(), &id[..])?;
        self.metadata.insert(LAST_BLOCK_KEY, &id[..])?;

        let metadata = ChainMetadata {
            height: block.height(),
            block_id: id,
            block_count: self.blocks.len() as u64,
            last_save_ts: chrono::Utc::now().timestamp(),
        };
        self.save_metadata(&metadata)?;
        self.flush()?;

        tracing::debug!("Stored base block {} at height {}", hex_prefix(&id), block.height());
        Ok(())
    }

    fn block_by_hash(&self, block_id: &Hash) -> Result<Option<BaseBlock>, StorageError> {
        match self.blocks.get(block_id)? {
            Some(bytes) => Ok(Some(Self::decode_block(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn hex_prefix(hash: &Hash) -> String {
    shard_primitives::hash::short_hex(hash)
}

/// Extension trait to add persistence to a state store
pub trait StateStorePersistence {
    /// Save all entries to persistent storage
    fn save_to_disk(&self, store: &PersistentStore) -> Result<usize, StorageError>;

    /// Load all entries from persistent storage
    fn load_from_disk(&self, store: &PersistentStore) -> Result<usize, StorageError>;
}

impl StateStorePersistence for crate::MemoryStateStore {
    fn save_to_disk(&self, store: &PersistentStore) -> Result<usize, StorageError> {
        let committed = self.committed();
        let Some(height) = committed.height else {
            tracing::debug!("Nothing committed yet, no state snapshot saved");
            return Ok(0);
        };

        store.store_state_snapshot(height, &committed.entries)?;
        tracing::info!(
            "Saved {} state entries at height {} to disk",
            committed.entries.len(),
            height
        );

        Ok(committed.entries.len())
    }

    fn load_from_disk(&self, store: &PersistentStore) -> Result<usize, StorageError> {
        let entries = store.get_all_state()?;
        let count = entries.len();

        for (key, value) in entries {
            self.insert(key, value);
        }

        match store.state_height()? {
            Some(height) => {
                self.commit(height)?;
                tracing::info!("Loaded {} state entries at height {} from disk", count, height);
            }
            None if count > 0 => {
                return Err(StorageError::Corruption(format!(
                    "{} state entries on disk without a snapshot height",
                    count
                )));
            }
            None => tracing::info!("No state snapshot on disk"),
        }

        Ok(count)
    }
}
