//! Ordered batch of serialized transactions

use crate::error::ProofError;
use crate::hash::Hash;
use crate::merkle::{self, Proof};
use borsh::{BorshDeserialize, BorshSerialize};

/// An ordered list of raw transaction blobs
///
/// Order decides the Merkle tree shape. A batch is never edited in place;
/// [`TxBatch::set_txs`] swaps the whole contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxBatch {
    txs: Vec<Vec<u8>>,
}

impl TxBatch {
    pub fn new(txs: Vec<Vec<u8>>) -> Self {
        Self { txs }
    }

    /// Replace the batch contents
    pub fn set_txs(&mut self, txs: Vec<Vec<u8>>) {
        self.txs = txs;
    }

    pub fn txs(&self) -> &[Vec<u8>] {
        &self.txs
    }

    pub fn into_txs(self) -> Vec<Vec<u8>> {
        self.txs
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Leaf hash of a single transaction
    pub fn hash(tx: &[u8]) -> Hash {
        merkle::leaf_hash(tx)
    }

    /// Merkle root over the batch, `None` when empty
    pub fn merkle_hash(&self) -> Option<Hash> {
        merkle::root(&self.txs)
    }

    /// Root and per-index proofs, `None` when empty
    pub fn proofs(&self) -> Option<(Hash, Vec<Proof>)> {
        merkle::proofs(&self.txs)
    }

    /// Position of `tx` in the batch (linear scan)
    pub fn index(&self, tx: &[u8]) -> Option<usize> {
        self.txs.iter().position(|candidate| candidate.as_slice() == tx)
    }

    /// Position of the transaction whose leaf hash is `hash` (linear scan)
    pub fn index_by_hash(&self, hash: &Hash) -> Option<usize> {
        self.txs.iter().position(|tx| &Self::hash(tx) == hash)
    }

    /// Inclusion proof for the transaction at `index`
    pub fn proof(&self, index: usize) -> Result<TxProof, ProofError> {
        if index >= self.txs.len() {
            return Err(ProofError::IndexOutOfRange {
                index: index as u64,
                total: self.txs.len() as u64,
            });
        }

        let (root_hash, mut proofs) = self.proofs().ok_or(ProofError::EmptyTree)?;
        let proof = proofs.swap_remove(index);

        Ok(TxProof {
            root_hash,
            data: self.txs[index].clone(),
            proof,
        })
    }
}

/// A transaction together with the proof that it belongs under `root_hash`
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxProof {
    pub root_hash: Hash,
    pub data: Vec<u8>,
    pub proof: Proof,
}

impl TxProof {
    /// Leaf hash of the proven transaction
    pub fn leaf(&self) -> Hash {
        TxBatch::hash(&self.data)
    }

    /// Check the proof against the root a block header claims
    pub fn validate(&self, data_hash: &Hash) -> Result<(), ProofError> {
        if data_hash != &self.root_hash {
            return Err(ProofError::DataHashMismatch);
        }
        self.proof.verify(&self.root_hash, &self.leaf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> TxBatch {
        TxBatch::new((0..n).map(|i| format!("transfer #{}", i).into_bytes()).collect())
    }

    #[test]
    fn test_full_batch_proofs_validate() {
        let batch = batch(500);
        let root = batch.merkle_hash().unwrap();

        for i in 0..500 {
            let proof = batch.proof(i).unwrap();
            assert_eq!(proof.proof.index, i as u64);
            assert_eq!(proof.proof.total, 500);
            proof.validate(&root).unwrap();
        }

        let mut swapped = batch.clone().into_txs();
        swapped.swap(0, 1);
        let reordered = TxBatch::new(swapped);
        assert_ne!(reordered.merkle_hash().unwrap(), root);
    }

    #[test]
    fn test_validate_rejects_other_root() {
        let batch = batch(8);
        let proof = batch.proof(3).unwrap();
        let other = [9u8; 32];
        assert_eq!(proof.validate(&other), Err(ProofError::DataHashMismatch));
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let batch = batch(3);
        assert!(matches!(
            batch.proof(3),
            Err(ProofError::IndexOutOfRange { index: 3, total: 3 })
        ));
        assert!(TxBatch::default().proof(0).is_err());
    }

    #[test]
    fn test_lookup() {
        let batch = batch(20);
        assert_eq!(batch.index(b"transfer #7"), Some(7));
        assert_eq!(batch.index(b"missing"), None);

        let hash = TxBatch::hash(b"transfer #12");
        assert_eq!(batch.index_by_hash(&hash), Some(12));
        assert_eq!(batch.index_by_hash(&[0u8; 32]), None);
    }

    #[test]
    fn test_set_txs_replaces_contents() {
        let mut batch = batch(4);
        let before = batch.merkle_hash();
        batch.set_txs(vec![b"only".to_vec()]);
        assert_eq!(batch.len(), 1);
        assert_ne!(batch.merkle_hash(), before);
        assert_eq!(batch.merkle_hash(), Some(TxBatch::hash(b"only")));
    }
}
