//! Validator node - re-derives each shard's Merkle root, checks every
//! transaction and votes on the child block

use crate::error::ConsensusError;
use crate::network::Network;
use crate::types::{
    vote_sign_bytes, ChildBlockMessage, ConsensusConfig, ConsensusMessage, ConsensusStats,
};
use parking_lot::RwLock;
use shard_primitives::hash::short_hex;
use shard_primitives::{
    Address, ChildBlock, Hash, PrivKey, PubKey, SignedTransaction, TxBatch, Validator, VoteInfo,
};
use std::sync::Arc;

/// Check that `batch` commits to `expected_root` and that every
/// transaction in it is well formed and correctly signed
///
/// The first failing index rejects the whole batch.
pub fn verify_txs(
    expected_root: &Hash,
    batch: &TxBatch,
    expected_total: u64,
) -> Result<(), ConsensusError> {
    let Some((root, proofs)) = batch.proofs() else {
        return Err(ConsensusError::EmptyBatch);
    };

    for (index, (tx, proof)) in batch.txs().iter().zip(&proofs).enumerate() {
        if proof.index != index as u64 {
            return Err(ConsensusError::ProofIndexMismatch {
                index,
                found: proof.index,
            });
        }
        if proof.total != expected_total {
            return Err(ConsensusError::ProofTotalMismatch {
                index,
                expected: expected_total,
                found: proof.total,
            });
        }
        proof
            .verify(expected_root, &TxBatch::hash(tx))
            .map_err(|source| ConsensusError::InvalidProof { index, source })?;

        let decoded = SignedTransaction::from_bytes(tx).map_err(|e| {
            ConsensusError::InvalidTransaction {
                index,
                reason: e.to_string(),
            }
        })?;
        if !decoded.verify_signature() {
            return Err(ConsensusError::InvalidSignature { index });
        }
    }

    tracing::trace!("Verified {} txs under root {}", proofs.len(), short_hex(&root));
    Ok(())
}

/// Validator node that verifies the supervisor's child blocks
pub struct ValidatorNode {
    priv_key: PrivKey,
    pub_key: PubKey,
    address: Address,
    network: Arc<dyn Network>,
    /// Highest child block height this node has voted on
    last_verified_height: RwLock<u64>,
    stats: RwLock<ConsensusStats>,
    config: ConsensusConfig,
}

impl ValidatorNode {
    /// Create a new validator node
    pub fn new(priv_key: PrivKey, network: Arc<dyn Network>, config: ConsensusConfig) -> Self {
        let pub_key = priv_key.pub_key();
        Self {
            address: pub_key.address(),
            pub_key,
            priv_key,
            network,
            last_verified_height: RwLock::new(0),
            stats: RwLock::new(ConsensusStats::default()),
            config,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn pub_key(&self) -> PubKey {
        self.pub_key
    }

    /// Get last verified height
    pub fn last_verified_height(&self) -> u64 {
        *self.last_verified_height.read()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.stats.read().clone()
    }

    /// Check the header against the block body and this node's limits
    fn check_header(&self, block: &ChildBlock) -> Result<(), ConsensusError> {
        let header = &block.header;
        if header.num_txs != block.txs.len() as u64 {
            return Err(ConsensusError::InvalidHeader(format!(
                "header counts {} txs, block carries {}",
                header.num_txs,
                block.txs.len()
            )));
        }
        if header.num_txs > self.config.batch_size as u64 {
            return Err(ConsensusError::InvalidHeader(format!(
                "{} txs exceed the batch size of {}",
                header.num_txs, self.config.batch_size
            )));
        }
        if header.compute_block_id()? != header.block_id {
            return Err(ConsensusError::InvalidHeader("block id does not match header".to_string()));
        }
        Ok(())
    }

    /// Verify a child block's header and transactions
    pub fn verify_block(&self, block: &ChildBlock) -> Result<(), ConsensusError> {
        self.check_header(block)?;
        verify_txs(&block.header.root_hash, &block.tx_batch(), block.header.num_txs)
    }

    /// Attach this node's signed vote to `message`
    pub fn vote(
        &self,
        mut message: ChildBlockMessage,
    ) -> Result<ChildBlockMessage, ConsensusError> {
        let signature = self
            .priv_key
            .sign(&vote_sign_bytes(&message.block.block_id()))?;
        message.vote = Some(VoteInfo {
            validator: Validator::new(self.pub_key, self.config.staking_power),
            signature,
            signed_current_block: true,
        });
        Ok(message)
    }

    /// Verify a shipped child block and send the vote back to `from`
    ///
    /// Rejected blocks get no vote.
    pub async fn handle_child_block(
        &self,
        from: Address,
        message: ChildBlockMessage,
    ) -> Result<(), ConsensusError> {
        let block_id = message.block.block_id();
        let height = message.block.header.height;

        if let Err(e) = self.verify_block(&message.block) {
            self.stats.write().batches_rejected += 1;
            tracing::error!(
                "Rejected child block {} at height {}: {}",
                short_hex(&block_id),
                height,
                e
            );
            return Err(e);
        }

        let vote = self.vote(message)?;
        self.network
            .send_to(&[from], ConsensusMessage::Vote(vote))
            .await?;

        {
            let mut last = self.last_verified_height.write();
            *last = (*last).max(height);
        }
        let mut stats = self.stats.write();
        stats.batches_verified += 1;
        stats.current_height = stats.current_height.max(height);
        drop(stats);

        tracing::info!("Voted for child block {} at height {}", short_hex(&block_id), height);
        Ok(())
    }
}

/// Builder for ValidatorNode
pub struct ValidatorNodeBuilder {
    config: ConsensusConfig,
    priv_key: PrivKey,
}

impl ValidatorNodeBuilder {
    pub fn new(priv_key: PrivKey) -> Self {
        Self {
            config: ConsensusConfig::default(),
            priv_key,
        }
    }

    pub fn config(mut self, config: ConsensusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn build(self, network: Arc<dyn Network>) -> ValidatorNode {
        ValidatorNode::new(self.priv_key, network, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_primitives::{KeyKind, ProofError};

    fn signed_batch(n: u64) -> TxBatch {
        let key = PrivKey::generate(KeyKind::Ed25519);
        TxBatch::new(
            (0..n)
                .map(|i| {
                    SignedTransaction::sign(&key, i, format!("op {}", i).into_bytes())
                        .unwrap()
                        .to_bytes()
                        .unwrap()
                })
                .collect(),
        )
    }

    #[test]
    fn test_verify_full_batch() {
        let batch = signed_batch(500);
        let root = batch.merkle_hash().unwrap();
        verify_txs(&root, &batch, 500).unwrap();
    }

    #[test]
    fn test_verify_rejects_empty_batch() {
        assert!(matches!(
            verify_txs(&[0u8; 32], &TxBatch::default(), 0),
            Err(ConsensusError::EmptyBatch)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_root() {
        let batch = signed_batch(4);
        let err = verify_txs(&[1u8; 32], &batch, 4).unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::InvalidProof {
                index: 0,
                source: ProofError::RootMismatch { .. }
            }
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_total() {
        let batch = signed_batch(6);
        let root = batch.merkle_hash().unwrap();
        assert!(matches!(
            verify_txs(&root, &batch, 500),
            Err(ConsensusError::ProofTotalMismatch {
                index: 0,
                expected: 500,
                found: 6
            })
        ));
    }

    #[test]
    fn test_verify_names_the_bad_transaction() {
        let mut txs = signed_batch(5).into_txs();
        let mut bad = SignedTransaction::from_bytes(&txs[3]).unwrap();
        bad.nonce += 1;
        txs[3] = bad.to_bytes().unwrap();

        let batch = TxBatch::new(txs);
        let root = batch.merkle_hash().unwrap();
        assert!(matches!(
            verify_txs(&root, &batch, 5),
            Err(ConsensusError::InvalidSignature { index: 3 })
        ));
    }

    #[test]
    fn test_flipped_signature_byte_stops_at_that_index() {
        let mut txs = signed_batch(100).into_txs();
        let mut tampered = SignedTransaction::from_bytes(&txs[37]).unwrap();
        tampered.signature[0] ^= 0x01;
        txs[37] = tampered.to_bytes().unwrap();

        let batch = TxBatch::new(txs);
        let root = batch.merkle_hash().unwrap();
        assert!(matches!(
            verify_txs(&root, &batch, 100),
            Err(ConsensusError::InvalidSignature { index: 37 })
        ));
    }

    #[test]
    fn test_verify_rejects_garbage_transaction() {
        let mut txs = signed_batch(3).into_txs();
        txs[1] = b"not a transaction".to_vec();
        let batch = TxBatch::new(txs);
        let root = batch.merkle_hash().unwrap();
        assert!(matches!(
            verify_txs(&root, &batch, 3),
            Err(ConsensusError::InvalidTransaction { index: 1, .. })
        ));
    }
}
