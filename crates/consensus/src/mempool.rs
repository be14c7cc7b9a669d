//! Pending transaction buffer
//!
//! Transactions are kept in arrival order and tagged with a sequence
//! number. The supervisor always ships from the front, so removal is
//! oldest-first.

use crate::error::ConsensusError;
use parking_lot::Mutex;
use shard_primitives::{hash::short_hex, Hash, SignedTransaction};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
struct PoolEntry {
    seq: u64,
    hash: Hash,
    tx: SignedTransaction,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: VecDeque<PoolEntry>,
    hashes: HashSet<Hash>,
    next_seq: u64,
}

/// Thread-safe FIFO of signed transactions
#[derive(Debug)]
pub struct MemPool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl MemPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            capacity,
        }
    }

    /// Append a transaction and return the new pool size
    pub fn add_tx(&self, tx: SignedTransaction) -> Result<usize, ConsensusError> {
        let hash = tx.hash()?;
        let mut inner = self.inner.lock();

        if inner.entries.len() >= self.capacity {
            return Err(ConsensusError::MempoolFull(self.capacity));
        }
        if !inner.hashes.insert(hash) {
            return Err(ConsensusError::DuplicateTransaction(short_hex(&hash)));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(PoolEntry { seq, hash, tx });
        Ok(inner.entries.len())
    }

    /// Snapshot of every pending transaction, oldest first
    pub fn get_txs(&self) -> Vec<SignedTransaction> {
        self.inner.lock().entries.iter().map(|e| e.tx.clone()).collect()
    }

    /// Snapshot of at most `limit` transactions from the front
    pub fn peek(&self, limit: usize) -> Vec<SignedTransaction> {
        self.inner
            .lock()
            .entries
            .iter()
            .take(limit)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Drop the `n` oldest transactions, or everything when `n` exceeds the size
    pub fn remove_txs(&self, n: usize) -> usize {
        let mut inner = self.inner.lock();
        let n = n.min(inner.entries.len());
        let removed: Vec<PoolEntry> = inner.entries.drain(..n).collect();
        for entry in &removed {
            inner.hashes.remove(&entry.hash);
        }
        if let Some(last) = removed.last() {
            tracing::trace!("Mempool dropped {} txs up to seq {}", n, last.seq);
        }
        n
    }

    /// Put shipped transactions back at the front, keeping their order
    ///
    /// They were admitted once already, so the capacity limit does not
    /// apply. Transactions already in the pool are skipped. Returns how many
    /// went back in.
    pub fn requeue(&self, txs: Vec<SignedTransaction>) -> Result<usize, ConsensusError> {
        let hashed = txs
            .into_iter()
            .map(|tx| Ok((tx.hash()?, tx)))
            .collect::<Result<Vec<_>, ConsensusError>>()?;

        let mut inner = self.inner.lock();
        let mut restored = 0;
        for (hash, tx) in hashed.into_iter().rev() {
            if !inner.hashes.insert(hash) {
                continue;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push_front(PoolEntry { seq, hash, tx });
            restored += 1;
        }
        Ok(restored)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_primitives::{KeyKind, PrivKey};

    fn txs(n: u64) -> Vec<SignedTransaction> {
        let key = PrivKey::generate(KeyKind::Ed25519);
        (0..n)
            .map(|i| SignedTransaction::sign(&key, i, vec![i as u8]).unwrap())
            .collect()
    }

    #[test]
    fn test_add_and_remove_oldest_first() {
        let pool = MemPool::new(100);
        let txs = txs(5);
        for (i, tx) in txs.iter().enumerate() {
            assert_eq!(pool.add_tx(tx.clone()).unwrap(), i + 1);
        }

        assert_eq!(pool.remove_txs(2), 2);
        assert_eq!(pool.get_txs(), txs[2..].to_vec());
        assert_eq!(pool.peek(1), vec![txs[2].clone()]);
        assert!(!pool.contains(&txs[0].hash().unwrap()));
        assert!(pool.contains(&txs[4].hash().unwrap()));
    }

    #[test]
    fn test_remove_more_than_len_drains() {
        let pool = MemPool::new(100);
        for tx in txs(3) {
            pool.add_tx(tx).unwrap();
        }
        assert_eq!(pool.remove_txs(10), 3);
        assert!(pool.is_empty());
        assert_eq!(pool.remove_txs(1), 0);
    }

    #[test]
    fn test_rejects_duplicates_and_overflow() {
        let pool = MemPool::new(2);
        let txs = txs(3);
        pool.add_tx(txs[0].clone()).unwrap();
        assert!(matches!(
            pool.add_tx(txs[0].clone()),
            Err(ConsensusError::DuplicateTransaction(_))
        ));
        pool.add_tx(txs[1].clone()).unwrap();
        assert!(matches!(
            pool.add_tx(txs[2].clone()),
            Err(ConsensusError::MempoolFull(2))
        ));

        // a removed transaction may be submitted again
        pool.remove_txs(1);
        pool.add_tx(txs[0].clone()).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_requeue_goes_to_the_front() {
        let pool = MemPool::new(3);
        let txs = txs(5);
        for tx in &txs[..3] {
            pool.add_tx(tx.clone()).unwrap();
        }
        pool.remove_txs(2);
        pool.add_tx(txs[3].clone()).unwrap();
        pool.add_tx(txs[4].clone()).unwrap();

        // over capacity and with txs[2] already pooled
        assert_eq!(pool.requeue(txs[..3].to_vec()).unwrap(), 2);
        assert_eq!(
            pool.get_txs(),
            vec![
                txs[0].clone(),
                txs[1].clone(),
                txs[2].clone(),
                txs[3].clone(),
                txs[4].clone()
            ]
        );
    }

    #[test]
    fn test_concurrent_adds_are_all_kept() {
        let pool = std::sync::Arc::new(MemPool::new(10_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for tx in txs(50) {
                        pool.add_tx(tx).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.len(), 200);
    }
}
