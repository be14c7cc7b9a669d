//! Block Producer - the supervisor's tick loop
//!
//! Each tick first assembles a base block from the child blocks and votes
//! gathered since the previous tick, stores it and commits state, then
//! ships the next round of mempool transactions. Votes that have not
//! arrived by the next tick are simply left out; the block time is the
//! only wait. Child blocks that end a height without a vote are left out,
//! and their transactions are shipped again.
//!
//! On start the state store is brought level with the stored chain: blocks
//! past the state snapshot are replayed, and every replayed header must
//! carry the root of the state it was built on.

use crate::error::ConsensusError;
use crate::supervisor::Supervisor;
use crate::types::ConsensusMessage;
use shard_primitives::hash::short_hex;
use shard_primitives::{BaseBlock, ChildBlock, Hash, SignedTransaction};
use shard_storage::{BlockStore, StateStore, StorageError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Prefix of the per-sender nonce entries in the state store
const NONCE_PREFIX: &[u8] = b"nonce:";

/// Block update event sent to subscribers
#[derive(Clone, Debug)]
pub struct BlockUpdate {
    pub height: u64,
    pub block_id: Hash,
    pub state_root: Hash,
    /// Child blocks included in the block
    pub child_blocks: usize,
    /// Transactions across those child blocks
    pub transaction_count: usize,
    /// Votes across those child blocks
    pub vote_count: usize,
    /// Assembly time in microseconds
    pub processing_time_us: u64,
}

/// Stops a running producer from another task
#[derive(Clone)]
pub struct ProducerHandle {
    running: Arc<AtomicBool>,
}

impl ProducerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Drives a [`Supervisor`] through one height per tick
pub struct BlockProducer {
    supervisor: Arc<Supervisor>,
    blocks: Arc<dyn BlockStore>,
    state: Arc<dyn StateStore>,
    /// Last stored base block
    head: BaseBlock,
    update_sender: broadcast::Sender<BlockUpdate>,
    running: Arc<AtomicBool>,
}

impl BlockProducer {
    /// Create a producer on top of the store's last block
    ///
    /// An empty store is seeded with the genesis block. The state store is
    /// caught up with the chain and the supervisor adopts its root.
    pub fn new(
        supervisor: Arc<Supervisor>,
        blocks: Arc<dyn BlockStore>,
        state: Arc<dyn StateStore>,
    ) -> Result<Self, ConsensusError> {
        let head = match blocks.last_block()? {
            Some(block) => {
                tracing::info!(
                    "Resuming from block {} at height {}",
                    short_hex(&block.block_id()),
                    block.height()
                );
                block
            }
            None => {
                let genesis = BaseBlock::genesis()?;
                blocks.add_base_block(&genesis)?;
                tracing::info!("Initialized chain with genesis {}", short_hex(&genesis.block_id()));
                genesis
            }
        };

        let state_root = restore_state(blocks.as_ref(), state.as_ref(), &head)?;
        supervisor.set_state_root(head.height(), state_root);

        let (update_sender, _) = broadcast::channel(64);
        Ok(Self {
            supervisor,
            blocks,
            state,
            head,
            update_sender,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to block updates
    pub fn subscribe(&self) -> broadcast::Receiver<BlockUpdate> {
        self.update_sender.subscribe()
    }

    pub fn handle(&self) -> ProducerHandle {
        ProducerHandle {
            running: self.running.clone(),
        }
    }

    /// Check if the block producer is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the block producer
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn head(&self) -> &BaseBlock {
        &self.head
    }

    /// Run one production step
    ///
    /// Returns the update for the base block stored this tick, if any.
    pub async fn tick(&mut self) -> Result<Option<BlockUpdate>, ConsensusError> {
        let tick_start = Instant::now();
        let mut update = None;

        let create_empty_blocks = self.supervisor.config().create_empty_blocks;
        if self.supervisor.has_pending() || create_empty_blocks {
            match self.supervisor.create_base_block(&self.head) {
                Ok(block) if block.header.child_block_hash.is_none() && !create_empty_blocks => {
                    // nothing was voted for, so there is no block to store
                    let released = self.supervisor.release_unvoted(self.head.height() + 1);
                    self.requeue(released);
                }
                Ok(block) => match self.blocks.add_base_block(&block) {
                    Ok(()) => {
                        let mut assembled = self.apply_block(block)?;
                        assembled.processing_time_us = tick_start.elapsed().as_micros() as u64;
                        update = Some(assembled);
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => tracing::warn!(
                        "Storing block at height {} failed, retrying next tick: {}",
                        block.height(),
                        e
                    ),
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(
                    "Assembly at height {} failed, retrying next tick: {}",
                    self.head.height() + 1,
                    e
                ),
            }
        }

        match self.ship_pending().await {
            Ok(0) => {}
            Ok(shipped) => {
                tracing::debug!("Shipped {} txs for height {}", shipped, self.head.height() + 1)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!("Sharding failed: {}", e),
        }

        let heartbeat = ConsensusMessage::Heartbeat {
            height: self.head.height(),
        };
        if let Err(e) = self.supervisor.network().broadcast(heartbeat).await {
            tracing::debug!("Heartbeat failed: {}", e);
        }

        Ok(update)
    }

    /// Apply a stored block to state and let the supervisor forget it
    ///
    /// Any failure here stops the producer, since the stored chain and
    /// the state would otherwise drift apart.
    fn apply_block(&mut self, block: BaseBlock) -> Result<BlockUpdate, ConsensusError> {
        let child_blocks = block.decode_child_blocks()?;
        let vote_count: usize = block
            .decode_vote_commits()?
            .iter()
            .map(|commit| commit.votes.len())
            .sum();

        let transaction_count = apply_child_blocks(self.state.as_ref(), &child_blocks)?;
        let state_root = self.state.commit(block.height())?;
        let released = self.supervisor.commit(&block, state_root)?;
        self.requeue(released);

        tracing::info!(
            "Height {} | {} child blocks | {} txs | {} votes",
            block.height(),
            child_blocks.len(),
            transaction_count,
            vote_count
        );

        let update = BlockUpdate {
            height: block.height(),
            block_id: block.block_id(),
            state_root,
            child_blocks: child_blocks.len(),
            transaction_count,
            vote_count,
            processing_time_us: 0,
        };
        self.head = block;
        Ok(update)
    }

    /// Return the transactions of unvoted child blocks to the mempool
    fn requeue(&self, released: Vec<ChildBlock>) {
        if released.is_empty() {
            return;
        }

        let txs = released
            .iter()
            .flat_map(|block| block.txs.iter())
            .map(|bytes| SignedTransaction::from_bytes(bytes))
            .collect::<Result<Vec<_>, _>>();
        let restored = match txs {
            Ok(txs) => self.supervisor.mempool().requeue(txs),
            Err(e) => Err(e.into()),
        };
        match restored {
            Ok(count) => tracing::info!(
                "Returned {} txs from {} unvoted child blocks to the mempool",
                count,
                released.len()
            ),
            Err(e) => tracing::warn!(
                "Dropping txs of {} unvoted child blocks: {}",
                released.len(),
                e
            ),
        }
    }

    /// Ship as many full batches as there are validators
    async fn ship_pending(&self) -> Result<usize, ConsensusError> {
        let group = self.supervisor.validator_group();
        let mempool = self.supervisor.mempool();
        if group.is_empty() || mempool.is_empty() {
            return Ok(0);
        }

        let limit = self
            .supervisor
            .config()
            .batch_size
            .max(1)
            .saturating_mul(group.len());
        let txs = mempool.peek(limit);
        let shipped = self
            .supervisor
            .shard_to_validators(&txs, &group, self.head.height() + 1, self.head.block_id())
            .await?;
        mempool.remove_txs(shipped);
        Ok(shipped)
    }

    /// Run the block producer until stopped or a fatal error
    pub async fn run_async(mut self) -> Result<(), ConsensusError> {
        self.running.store(true, Ordering::SeqCst);

        let block_time_ms = self.supervisor.config().block_time_ms.max(1);
        let block_duration = Duration::from_millis(block_time_ms);
        let mut interval = tokio::time::interval(block_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Block producer started ({}ms blocks) at height {}",
            block_time_ms,
            self.head.height()
        );

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let tick_start = Instant::now();

            match self.tick().await {
                Ok(Some(update)) => {
                    let _ = self.update_sender.send(update);
                }
                Ok(None) => {}
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    tracing::error!(
                        "Block producer halted at height {}: {}",
                        self.head.height(),
                        e
                    );
                    return Err(e);
                }
            }

            // Warn if we're falling behind
            let processing_time = tick_start.elapsed();
            if processing_time > block_duration {
                tracing::warn!(
                    "Tick at height {} took {:.2}ms (target: {}ms)",
                    self.head.height(),
                    processing_time.as_secs_f64() * 1000.0,
                    block_time_ms
                );
            }
        }

        tracing::info!("Block producer stopped at height {}", self.head.height());
        Ok(())
    }
}

/// Bring `state` level with `head` by replaying the blocks its snapshot lacks
///
/// A block's header carries the root of the state it was built on, so each
/// replayed block checks the state before applying it. Returns the root
/// after `head`.
fn restore_state(
    blocks: &dyn BlockStore,
    state: &dyn StateStore,
    head: &BaseBlock,
) -> Result<Hash, ConsensusError> {
    let from = state.committed_height().unwrap_or(0);
    if from > head.height() {
        return Err(StorageError::Corruption(format!(
            "state snapshot at height {} is ahead of the chain head at {}",
            from,
            head.height()
        ))
        .into());
    }

    let mut missing = Vec::new();
    let mut block = head.clone();
    while block.height() > from {
        let parent_id = block.header.last_block_id;
        let parent = blocks.block_by_hash(&parent_id)?.ok_or_else(|| {
            StorageError::Corruption(format!(
                "block {} below height {} is missing",
                short_hex(&parent_id),
                block.height()
            ))
        })?;
        missing.push(block);
        block = parent;
    }
    if !missing.is_empty() {
        tracing::info!(
            "Replaying {} blocks from height {} onto the state snapshot",
            missing.len(),
            from + 1
        );
    }

    let mut root = state.commit(from)?;
    for block in missing.iter().rev() {
        if block.header.state_root != root {
            return Err(StorageError::Corruption(format!(
                "block {} at height {} expects state root {}, state has {}",
                short_hex(&block.block_id()),
                block.height(),
                short_hex(&block.header.state_root),
                short_hex(&root)
            ))
            .into());
        }
        apply_child_blocks(state, &block.decode_child_blocks()?)?;
        root = state.commit(block.height())?;
    }
    Ok(root)
}

/// Apply every transaction of `child_blocks`, returning how many there were
fn apply_child_blocks(
    state: &dyn StateStore,
    child_blocks: &[ChildBlock],
) -> Result<usize, ConsensusError> {
    let mut count = 0;
    for child in child_blocks {
        for tx in &child.txs {
            apply_tx(state, tx)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Record the sender's next expected nonce
///
/// The stored nonce only grows, so applying a transaction twice is harmless.
fn apply_tx(state: &dyn StateStore, bytes: &[u8]) -> Result<(), ConsensusError> {
    let tx = SignedTransaction::from_bytes(bytes)?;
    let key = [NONCE_PREFIX, tx.sender().as_bytes()].concat();

    let current = state
        .try_get(&key)?
        .and_then(|value| <[u8; 8]>::try_from(value.as_slice()).ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0);
    let next = current.max(tx.nonce.saturating_add(1));
    state.try_update(&key, next.to_le_bytes().to_vec())?;
    Ok(())
}
