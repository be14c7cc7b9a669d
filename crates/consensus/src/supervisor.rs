//! Supervisor node - shards the mempool to validators and assembles base blocks
//!
//! Per height the supervisor moves through three phases:
//! - Accumulating: child blocks are shipped and votes trickle back
//! - Assembling: [`Supervisor::create_base_block`] snapshots every voted child block
//! - Committed: [`Supervisor::commit`] drops what the stored block included
//!
//! A child block nobody voted for never enters a base block. Once its
//! height is committed it is released, and its transactions go back to the
//! mempool. A failed assembly leaves the pending set untouched and is
//! retried on the next tick.

use crate::error::ConsensusError;
use crate::mempool::MemPool;
use crate::network::Network;
use crate::types::{
    vote_sign_bytes, ChildBlockMessage, ConsensusConfig, ConsensusMessage, ConsensusStats,
};
use parking_lot::{Mutex, RwLock};
use shard_primitives::hash::{hash, short_hex};
use shard_primitives::{
    codec, merkle, Address, BaseBlock, BaseHeader, ChildBlock, ChildHeader, Hash, PubKey,
    SignedTransaction, Validator, ValidatorGroup, VoteCommit, VoteInfo, ZERO_HASH,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Everything the supervisor mutates, guarded together
#[derive(Default)]
struct SupervisorState {
    /// Admission order; swap-remove reorders it
    validators: Vec<Validator>,
    /// Child blocks shipped since the last commit
    child_blocks: Vec<ChildBlock>,
    /// Votes per pending child block id
    votes: HashMap<Hash, Vec<VoteInfo>>,
    /// Root recorded by the last commit
    state_root: Hash,
}

/// Supervisor node that shards transactions and assembles base blocks
pub struct Supervisor {
    network: Arc<dyn Network>,
    mempool: Arc<MemPool>,
    state: Mutex<SupervisorState>,
    stats: RwLock<ConsensusStats>,
    config: ConsensusConfig,
}

impl Supervisor {
    /// Create a new supervisor
    pub fn new(network: Arc<dyn Network>, mempool: Arc<MemPool>, config: ConsensusConfig) -> Self {
        Self {
            network,
            mempool,
            state: Mutex::new(SupervisorState {
                state_root: ZERO_HASH,
                ..Default::default()
            }),
            stats: RwLock::new(ConsensusStats::default()),
            config,
        }
    }

    pub fn address(&self) -> Address {
        self.network.local_address()
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn mempool(&self) -> &Arc<MemPool> {
        &self.mempool
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Admit a validator with the configured staking power
    ///
    /// Returns `false` when the address is already a member.
    pub fn add_validator(&self, pub_key: PubKey, address: Address) -> Result<bool, ConsensusError> {
        if pub_key.address() != address {
            return Err(ConsensusError::AddressMismatch { address });
        }

        let mut state = self.state.lock();
        if state.validators.iter().any(|v| v.address == address) {
            return Ok(false);
        }
        state
            .validators
            .push(Validator::new(pub_key, self.config.staking_power));
        let count = state.validators.len();
        drop(state);

        self.stats.write().connected_validators = count;
        tracing::info!("Validator {} joined ({} total)", address, count);
        Ok(true)
    }

    /// Remove a validator by swapping the last member into its slot
    ///
    /// The list order is not preserved; the group view re-sorts anyway.
    pub fn remove_validator(&self, address: &Address) -> Result<Validator, ConsensusError> {
        let mut state = self.state.lock();
        let index = state
            .validators
            .iter()
            .position(|v| &v.address == address)
            .ok_or(ConsensusError::ValidatorNotFound(*address))?;
        let removed = state.validators.swap_remove(index);
        let count = state.validators.len();
        drop(state);

        self.stats.write().connected_validators = count;
        tracing::info!("Validator {} left ({} remaining)", address, count);
        Ok(removed)
    }

    /// Members in admission order
    pub fn validators(&self) -> Vec<Validator> {
        self.state.lock().validators.clone()
    }

    /// Sorted view of the current membership
    pub fn validator_group(&self) -> ValidatorGroup {
        ValidatorGroup::new(self.validators())
    }

    pub fn pending_child_blocks(&self) -> Vec<ChildBlock> {
        self.state.lock().child_blocks.clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().child_blocks.is_empty()
    }

    pub fn votes_for(&self, block_id: &Hash) -> Vec<VoteInfo> {
        self.state
            .lock()
            .votes
            .get(block_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn state_root(&self) -> Hash {
        self.state.lock().state_root
    }

    /// Adopt the state root committed for block `height`, as on a restart
    pub fn set_state_root(&self, height: u64, state_root: Hash) {
        self.state.lock().state_root = state_root;
        self.stats.write().current_height = height;
        tracing::debug!(
            "State root at height {} set to {}",
            height,
            short_hex(&state_root)
        );
    }

    /// Build a child block over `txs` and record it as pending
    ///
    /// Returns `None` for an empty slice.
    pub fn create_child_block(
        &self,
        txs: &[SignedTransaction],
        height: u64,
        last_block_id: Hash,
    ) -> Result<Option<ChildBlock>, ConsensusError> {
        if txs.is_empty() {
            return Ok(None);
        }

        let encoded = txs
            .iter()
            .map(SignedTransaction::to_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        let Some(root_hash) = merkle::root(&encoded) else {
            return Ok(None);
        };

        let mut state = self.state.lock();
        let earlier: u64 = state
            .child_blocks
            .iter()
            .filter(|b| b.header.height == height)
            .map(|b| b.header.num_txs)
            .sum();

        let mut header = ChildHeader {
            supervisor_id: self.address(),
            num_txs: encoded.len() as u64,
            total_txs: earlier + encoded.len() as u64,
            root_hash,
            height,
            last_block_id,
            block_id: ZERO_HASH,
        };
        header.seal()?;

        let block = ChildBlock {
            header,
            txs: encoded,
        };
        state.child_blocks.push(block.clone());
        drop(state);

        self.stats.write().child_blocks_created += 1;
        tracing::debug!(
            "Child block {} at height {}: {} txs",
            short_hex(&block.block_id()),
            height,
            block.header.num_txs
        );
        Ok(Some(block))
    }

    /// Cut `txs` into batches and ship one to each member of `group`
    ///
    /// Only as many batches as there are validators leave; the rest stay
    /// in the mempool for the next height. Returns the number of
    /// transactions shipped, always a prefix of `txs`.
    pub async fn shard_to_validators(
        &self,
        txs: &[SignedTransaction],
        group: &ValidatorGroup,
        height: u64,
        last_block_id: Hash,
    ) -> Result<usize, ConsensusError> {
        if txs.is_empty() {
            return Ok(0);
        }
        if group.is_empty() {
            tracing::warn!("{} txs pending but no validators connected", txs.len());
            return Ok(0);
        }

        let batch_size = self.config.batch_size.max(1);
        let mut shipped = 0;

        for (batch, validator) in txs.chunks(batch_size).zip(group.iter()) {
            let Some(block) = self.create_child_block(batch, height, last_block_id)? else {
                continue;
            };
            shipped += batch.len();

            let message = ConsensusMessage::ChildBlock(ChildBlockMessage::new(block));
            if let Err(e) = self.network.send_to(&[validator.address], message).await {
                // The block stays pending and is committed without this vote
                tracing::warn!("Failed to ship child block to {}: {}", validator.address, e);
            }
        }

        self.stats.write().txs_sharded += shipped as u64;
        tracing::debug!(
            "Sharded {} of {} txs to {} validators at height {}",
            shipped,
            txs.len(),
            group.len(),
            height
        );
        Ok(shipped)
    }

    /// Record a validator's vote on a pending child block
    ///
    /// Returns `false` for a repeated vote from the same validator.
    pub fn add_vote(&self, message: ChildBlockMessage) -> Result<bool, ConsensusError> {
        let result = self.check_and_add_vote(message);
        let mut stats = self.stats.write();
        match &result {
            Ok(true) => stats.votes_received += 1,
            Ok(false) => {}
            Err(_) => stats.votes_rejected += 1,
        }
        result
    }

    fn check_and_add_vote(&self, message: ChildBlockMessage) -> Result<bool, ConsensusError> {
        let vote = message
            .vote
            .ok_or_else(|| ConsensusError::InvalidVote("message carries no vote".to_string()))?;
        let block_id = message.block.block_id();

        if !vote.signed_current_block {
            return Err(ConsensusError::InvalidVote("vote is not for this block".to_string()));
        }
        if !vote
            .validator
            .pub_key
            .verify_bytes(&vote_sign_bytes(&block_id), &vote.signature)
        {
            return Err(ConsensusError::InvalidVote(format!(
                "bad signature from {}",
                vote.validator.address
            )));
        }

        let mut state = self.state.lock();
        let member = state
            .validators
            .iter()
            .any(|v| v.address == vote.validator.address && v.pub_key == vote.validator.pub_key);
        if !member {
            return Err(ConsensusError::ValidatorNotFound(vote.validator.address));
        }
        if !state.child_blocks.iter().any(|b| b.block_id() == block_id) {
            return Err(ConsensusError::UnknownChildBlock(short_hex(&block_id)));
        }

        let votes = state.votes.entry(block_id).or_default();
        if votes
            .iter()
            .any(|v| v.validator.address == vote.validator.address)
        {
            return Ok(false);
        }
        tracing::debug!(
            "Vote from {} on child block {}",
            vote.validator.address,
            short_hex(&block_id)
        );
        votes.push(vote);
        Ok(true)
    }

    /// Assemble the next base block from every pending child block with a vote
    ///
    /// The snapshot is taken under one lock, so child blocks, votes and
    /// membership are mutually consistent. Nothing is cleared here.
    pub fn create_base_block(&self, last_block: &BaseBlock) -> Result<BaseBlock, ConsensusError> {
        let state = self.state.lock();
        let height = last_block.height() + 1;

        let voted: Vec<&ChildBlock> = state
            .child_blocks
            .iter()
            .filter(|block| {
                state
                    .votes
                    .get(&block.block_id())
                    .is_some_and(|votes| !votes.is_empty())
            })
            .collect();
        let held_back = state.child_blocks.len() - voted.len();
        if held_back > 0 {
            tracing::warn!("Height {}: {} child blocks have no vote yet", height, held_back);
        }

        let child_bytes = voted
            .iter()
            .map(|block| block.to_bytes())
            .collect::<Result<Vec<_>, _>>()?;
        let child_block_hash = merkle::root(&child_bytes);
        if child_block_hash.is_none() {
            tracing::warn!("Height {}: no child blocks, child block hash is empty", height);
        }

        let group = ValidatorGroup::new(state.validators.clone());
        let validator_group_hash = group.hash()?;
        if validator_group_hash.is_none() {
            tracing::warn!("Height {}: validator group is empty", height);
        }
        // Membership changes take effect on arrival, so next == current
        let next_validator_group_hash = validator_group_hash;

        let commits: Vec<VoteCommit> = voted
            .iter()
            .map(|block| VoteCommit {
                block_id: block.block_id(),
                votes: state.votes.get(&block.block_id()).cloned().unwrap_or_default(),
            })
            .collect();
        let vote_commits = codec::encode(&commits)?;
        let validators = codec::encode(group.validators())?;

        let mut header = BaseHeader {
            time: chrono::Utc::now()
                .timestamp_millis()
                .max(last_block.header.time),
            height,
            block_id: ZERO_HASH,
            last_block_id: last_block.block_id(),
            validator_group_hash,
            next_validator_group_hash,
            child_block_hash,
            last_vote_hash: hash(&vote_commits),
            state_root: state.state_root,
        };
        header.seal()?;

        let block = BaseBlock {
            header,
            child_blocks: codec::encode(&voted)?,
            vote_commits,
            validators: validators.clone(),
            next_validators: validators,
        };
        let child_count = voted.len();
        drop(state);

        self.stats.write().base_blocks_assembled += 1;
        tracing::info!(
            "Assembled base block {} at height {} with {} child blocks",
            short_hex(&block.block_id()),
            height,
            child_count
        );
        Ok(block)
    }

    /// Forget everything `block` included and record the new state root
    ///
    /// Child blocks built for this height or earlier that still have no
    /// vote are released too and returned.
    pub fn commit(
        &self,
        block: &BaseBlock,
        state_root: Hash,
    ) -> Result<Vec<ChildBlock>, ConsensusError> {
        let included: HashSet<Hash> = block
            .decode_vote_commits()?
            .into_iter()
            .map(|commit| commit.block_id)
            .collect();

        let mut state = self.state.lock();
        state
            .child_blocks
            .retain(|b| !included.contains(&b.block_id()));
        state.votes.retain(|id, _| !included.contains(id));
        state.state_root = state_root;
        let released = Self::take_unvoted(&mut state, block.height());
        drop(state);

        self.stats.write().current_height = block.height();
        tracing::debug!(
            "Committed height {} with state root {}",
            block.height(),
            short_hex(&state_root)
        );
        Ok(released)
    }

    /// Drop unvoted child blocks built for `height` or earlier
    ///
    /// Used when a height ends without a stored base block.
    pub fn release_unvoted(&self, height: u64) -> Vec<ChildBlock> {
        Self::take_unvoted(&mut self.state.lock(), height)
    }

    fn take_unvoted(state: &mut SupervisorState, height: u64) -> Vec<ChildBlock> {
        let (released, kept): (Vec<ChildBlock>, Vec<ChildBlock>) =
            std::mem::take(&mut state.child_blocks)
                .into_iter()
                .partition(|b| {
                    b.header.height <= height
                        && state
                            .votes
                            .get(&b.block_id())
                            .map_or(true, |votes| votes.is_empty())
                });
        state.child_blocks = kept;
        for block in &released {
            state.votes.remove(&block.block_id());
            tracing::warn!(
                "Child block {} at height {} released without a vote",
                short_hex(&block.block_id()),
                block.header.height
            );
        }
        released
    }

    /// Get current stats
    pub fn stats(&self) -> ConsensusStats {
        let mut stats = self.stats.read().clone();
        let state = self.state.lock();
        stats.connected_validators = state.validators.len();
        stats.pending_child_blocks = state.child_blocks.len();
        stats
    }
}

/// Builder for Supervisor
pub struct SupervisorBuilder {
    config: ConsensusConfig,
    mempool: Option<Arc<MemPool>>,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            config: ConsensusConfig::default(),
            mempool: None,
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

    pub fn staking_power(mut self, power: i64) -> Self {
        self.config.staking_power = power;
        self
    }

    /// Share an existing mempool instead of creating one from the config
    pub fn mempool(mut self, mempool: Arc<MemPool>) -> Self {
        self.mempool = Some(mempool);
        self
    }

    pub fn build(self, network: Arc<dyn Network>) -> Supervisor {
        let mempool = self
            .mempool
            .unwrap_or_else(|| Arc::new(MemPool::new(self.config.mempool_capacity)));
        Supervisor::new(network, mempool, self.config)
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Dispatcher, LocalHub};
    use shard_primitives::{KeyKind, PrivKey, TxBatch};

    fn supervisor(batch_size: usize) -> Supervisor {
        let hub = LocalHub::new();
        let key = PrivKey::generate(KeyKind::Ed25519);
        let network = hub.join(key.pub_key().address(), Dispatcher::new());
        SupervisorBuilder::new()
            .batch_size(batch_size)
            .build(Arc::new(network))
    }

    fn txs(n: u64) -> Vec<SignedTransaction> {
        let key = PrivKey::generate(KeyKind::Secp256k1);
        (0..n)
            .map(|i| SignedTransaction::sign(&key, i, i.to_le_bytes().to_vec()).unwrap())
            .collect()
    }

    fn sign_vote(key: &PrivKey, block: &ChildBlock, power: i64) -> ChildBlockMessage {
        ChildBlockMessage {
            block: block.clone(),
            vote: Some(VoteInfo {
                validator: Validator::new(key.pub_key(), power),
                signature: key.sign(&vote_sign_bytes(&block.block_id())).unwrap(),
                signed_current_block: true,
            }),
        }
    }

    #[test]
    fn test_add_validator_rejects_duplicates() {
        let sup = supervisor(10);
        let key = PrivKey::generate(KeyKind::Ed25519);
        let pk = key.pub_key();

        assert!(sup.add_validator(pk, pk.address()).unwrap());
        assert!(!sup.add_validator(pk, pk.address()).unwrap());
        assert_eq!(sup.validators().len(), 1);
        assert_eq!(sup.validators()[0].staking_power, 100);

        let other = PrivKey::generate(KeyKind::Ed25519).pub_key();
        assert!(matches!(
            sup.add_validator(other, pk.address()),
            Err(ConsensusError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_validator_swaps_last_in() {
        let sup = supervisor(10);
        let keys: Vec<PubKey> = (0..3)
            .map(|_| PrivKey::generate(KeyKind::Ed25519).pub_key())
            .collect();
        for pk in &keys {
            sup.add_validator(*pk, pk.address()).unwrap();
        }

        let removed = sup.remove_validator(&keys[0].address()).unwrap();
        assert_eq!(removed.pub_key, keys[0]);
        let order: Vec<PubKey> = sup.validators().iter().map(|v| v.pub_key).collect();
        assert_eq!(order, vec![keys[2], keys[1]]);

        assert!(matches!(
            sup.remove_validator(&keys[0].address()),
            Err(ConsensusError::ValidatorNotFound(_))
        ));
    }

    #[test]
    fn test_remove_in_any_order_keeps_the_rest() {
        let sup = supervisor(10);
        let keys: Vec<PubKey> = (0..10)
            .map(|_| PrivKey::generate(KeyKind::Ed25519).pub_key())
            .collect();
        for pk in &keys {
            sup.add_validator(*pk, pk.address()).unwrap();
        }

        let removal_order = [7, 0, 9, 3, 4];
        for (removed, &i) in removal_order.iter().enumerate() {
            sup.remove_validator(&keys[i].address()).unwrap();
            assert_eq!(sup.validators().len(), 10 - (removed + 1));
        }

        let mut remaining: Vec<Address> = sup.validators().iter().map(|v| v.address).collect();
        remaining.sort();
        let mut expected: Vec<Address> =
            [1, 2, 5, 6, 8].iter().map(|&i| keys[i].address()).collect();
        expected.sort();
        assert_eq!(remaining, expected);
    }

    #[tokio::test]
    async fn test_shard_empty_input_is_a_no_op() {
        let sup = supervisor(10);
        let pk = PrivKey::generate(KeyKind::Ed25519).pub_key();
        sup.add_validator(pk, pk.address()).unwrap();

        let shipped = sup
            .shard_to_validators(&[], &sup.validator_group(), 1, ZERO_HASH)
            .await
            .unwrap();
        assert_eq!(shipped, 0);
        assert!(!sup.has_pending());
    }

    #[test]
    fn test_create_child_block() {
        let sup = supervisor(10);
        assert!(sup.create_child_block(&[], 1, ZERO_HASH).unwrap().is_none());

        let txs = txs(4);
        let block = sup.create_child_block(&txs, 1, [7u8; 32]).unwrap().unwrap();
        let expected_root = TxBatch::new(txs.iter().map(|t| t.to_bytes().unwrap()).collect())
            .merkle_hash()
            .unwrap();

        assert_eq!(block.header.root_hash, expected_root);
        assert_eq!(block.header.num_txs, 4);
        assert_eq!(block.header.total_txs, 4);
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.last_block_id, [7u8; 32]);
        assert_eq!(block.header.supervisor_id, sup.address());
        assert_eq!(block.header.compute_block_id().unwrap(), block.block_id());

        let second = sup.create_child_block(&txs[..2], 1, [7u8; 32]).unwrap().unwrap();
        assert_eq!(second.header.total_txs, 6);
        assert_eq!(sup.pending_child_blocks().len(), 2);
    }

    #[test]
    fn test_add_vote_checks_signer_and_block() {
        let sup = supervisor(10);
        let member = PrivKey::generate(KeyKind::Ed25519);
        let outsider = PrivKey::generate(KeyKind::Secp256k1);
        sup.add_validator(member.pub_key(), member.pub_key().address())
            .unwrap();

        let block = sup.create_child_block(&txs(3), 1, ZERO_HASH).unwrap().unwrap();

        assert!(sup.add_vote(sign_vote(&member, &block, 100)).unwrap());
        assert!(!sup.add_vote(sign_vote(&member, &block, 100)).unwrap());
        assert_eq!(sup.votes_for(&block.block_id()).len(), 1);

        assert!(matches!(
            sup.add_vote(sign_vote(&outsider, &block, 100)),
            Err(ConsensusError::ValidatorNotFound(_))
        ));

        let mut forged = sign_vote(&member, &block, 100);
        forged.block.header.num_txs = 99;
        forged.block.header.seal().unwrap();
        assert!(matches!(
            sup.add_vote(forged),
            Err(ConsensusError::InvalidVote(_))
        ));

        assert!(matches!(
            sup.add_vote(ChildBlockMessage::new(block)),
            Err(ConsensusError::InvalidVote(_))
        ));
        assert_eq!(sup.stats().votes_rejected, 3);
    }

    #[test]
    fn test_base_block_and_commit() {
        let sup = supervisor(10);
        let member = PrivKey::generate(KeyKind::Ed25519);
        sup.add_validator(member.pub_key(), member.pub_key().address())
            .unwrap();

        let genesis = BaseBlock::genesis().unwrap();
        let block = sup
            .create_child_block(&txs(5), 1, genesis.block_id())
            .unwrap()
            .unwrap();
        sup.add_vote(sign_vote(&member, &block, 100)).unwrap();

        let base = sup.create_base_block(&genesis).unwrap();
        assert_eq!(base.height(), 1);
        assert_eq!(base.header.last_block_id, genesis.block_id());
        assert_eq!(base.header.compute_block_id().unwrap(), base.block_id());
        assert_eq!(
            base.header.child_block_hash,
            merkle::root(&[block.to_bytes().unwrap()])
        );
        assert_eq!(
            base.header.validator_group_hash,
            sup.validator_group().hash().unwrap()
        );
        assert_eq!(
            base.header.next_validator_group_hash,
            base.header.validator_group_hash
        );
        assert_eq!(base.header.last_vote_hash, hash(&base.vote_commits));

        let commits = base.decode_vote_commits().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].block_id, block.block_id());
        assert_eq!(commits[0].votes.len(), 1);
        assert_eq!(base.decode_child_blocks().unwrap(), vec![block]);
        assert_eq!(base.decode_validators().unwrap(), sup.validators());

        assert!(sup.commit(&base, [5u8; 32]).unwrap().is_empty());
        assert!(!sup.has_pending());
        assert_eq!(sup.state_root(), [5u8; 32]);
        assert_eq!(sup.stats().current_height, 1);

        let next = sup.create_base_block(&base).unwrap();
        assert_eq!(next.height(), 2);
        assert_eq!(next.header.state_root, [5u8; 32]);
        assert_eq!(next.header.child_block_hash, None);
    }

    #[test]
    fn test_unvoted_child_block_is_left_out_and_released() {
        let sup = supervisor(10);
        let member = PrivKey::generate(KeyKind::Ed25519);
        sup.add_validator(member.pub_key(), member.pub_key().address())
            .unwrap();

        let genesis = BaseBlock::genesis().unwrap();
        let voted = sup
            .create_child_block(&txs(3), 1, genesis.block_id())
            .unwrap()
            .unwrap();
        let unvoted = sup
            .create_child_block(&txs(2), 1, genesis.block_id())
            .unwrap()
            .unwrap();
        sup.add_vote(sign_vote(&member, &voted, 100)).unwrap();

        let base = sup.create_base_block(&genesis).unwrap();
        assert_eq!(base.decode_child_blocks().unwrap(), vec![voted.clone()]);
        assert_eq!(
            base.header.child_block_hash,
            merkle::root(&[voted.to_bytes().unwrap()])
        );
        let commits = base.decode_vote_commits().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].block_id, voted.block_id());

        let released = sup.commit(&base, [1u8; 32]).unwrap();
        assert_eq!(released, vec![unvoted.clone()]);
        assert!(!sup.has_pending());

        // a late vote finds nothing to attach to
        assert!(matches!(
            sup.add_vote(sign_vote(&member, &unvoted, 100)),
            Err(ConsensusError::UnknownChildBlock(_))
        ));
    }

    #[test]
    fn test_release_keeps_later_heights() {
        let sup = supervisor(10);
        let current = sup.create_child_block(&txs(2), 1, ZERO_HASH).unwrap().unwrap();
        let later = sup.create_child_block(&txs(2), 2, ZERO_HASH).unwrap().unwrap();

        assert_eq!(sup.release_unvoted(1), vec![current]);
        assert_eq!(sup.pending_child_blocks(), vec![later]);
    }

    #[test]
    fn test_set_state_root_feeds_next_header() {
        let sup = supervisor(10);
        sup.set_state_root(6, [8u8; 32]);
        assert_eq!(sup.state_root(), [8u8; 32]);
        assert_eq!(sup.stats().current_height, 6);

        let genesis = BaseBlock::genesis().unwrap();
        let base = sup.create_base_block(&genesis).unwrap();
        assert_eq!(base.header.state_root, [8u8; 32]);
    }

    #[test]
    fn test_empty_base_block_has_no_hashes() {
        let sup = supervisor(10);
        let genesis = BaseBlock::genesis().unwrap();
        let base = sup.create_base_block(&genesis).unwrap();
        assert_eq!(base.header.child_block_hash, None);
        assert_eq!(base.header.validator_group_hash, None);
        assert!(base.decode_vote_commits().unwrap().is_empty());
    }
}
