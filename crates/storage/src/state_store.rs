//! In-memory state storage using DashMap for concurrent access

use crate::error::StorageError;
use crate::StateStore;
use dashmap::DashMap;
use parking_lot::RwLock;
use shard_primitives::{codec, merkle, Hash, ZERO_HASH};
use std::sync::Arc;

/// Contents fixed by the last commit
#[derive(Debug, Clone, Default)]
pub struct CommittedState {
    /// Block height the contents belong to
    pub height: Option<u64>,
    pub root: Hash,
    /// Entries sorted by key
    pub entries: Arc<Vec<(Vec<u8>, Vec<u8>)>>,
}

/// Thread-safe in-memory key-value state
///
/// The committed root is the Merkle root over `(key, value)` pairs sorted
/// by key, so two stores with the same contents always agree on it.
#[derive(Clone)]
pub struct MemoryStateStore {
    /// Main entry storage
    entries: Arc<DashMap<Vec<u8>, Vec<u8>>>,
    /// Copy taken by the last commit; snapshots are saved from here
    committed: Arc<RwLock<CommittedState>>,
}

impl MemoryStateStore {
    /// Create a new empty state store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            committed: Arc::new(RwLock::new(CommittedState::default())),
        }
    }

    /// Store an entry
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    /// Copy of all entries, sorted by key
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Root produced by the last commit
    pub fn committed_root(&self) -> Hash {
        self.committed.read().root
    }

    /// Contents as of the last commit
    pub fn committed(&self) -> CommittedState {
        self.committed.read().clone()
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    fn try_update(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.insert(key.to_vec(), value);
        Ok(())
    }

    fn commit(&self, height: u64) -> Result<Hash, StorageError> {
        let entries = self.entries();
        let leaves = entries
            .iter()
            .map(codec::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let root = merkle::root(&leaves).unwrap_or(ZERO_HASH);
        *self.committed.write() = CommittedState {
            height: Some(height),
            root,
            entries: Arc::new(entries),
        };
        Ok(root)
    }

    fn committed_height(&self) -> Option<u64> {
        self.committed.read().height
    }
}
