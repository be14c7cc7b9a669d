//! Inbound message handling for each role

use crate::error::ConsensusError;
use crate::network::{Dispatcher, MessageHandler};
use crate::supervisor::Supervisor;
use crate::types::{ConsensusMessage, Opcode};
use crate::validator::ValidatorNode;
use async_trait::async_trait;
use shard_primitives::Address;
use std::sync::Arc;

/// Membership changes, votes and transaction submissions for a supervisor
pub struct SupervisorHandler {
    supervisor: Arc<Supervisor>,
}

impl SupervisorHandler {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    /// Register this handler on `dispatcher` for every opcode a supervisor serves
    pub fn register(self, dispatcher: &Dispatcher) {
        let handler: Arc<dyn MessageHandler> = Arc::new(self);
        for opcode in [
            Opcode::PeerConnected,
            Opcode::PeerDisconnected,
            Opcode::Vote,
            Opcode::Transaction,
            Opcode::Heartbeat,
        ] {
            dispatcher.register(opcode, handler.clone());
        }
    }
}

#[async_trait]
impl MessageHandler for SupervisorHandler {
    async fn handle(&self, from: Address, message: ConsensusMessage) -> Result<(), ConsensusError> {
        match message {
            ConsensusMessage::PeerConnected { pub_key } => {
                self.supervisor.add_validator(pub_key, from)?;
            }
            ConsensusMessage::PeerDisconnected { address } => {
                self.supervisor.remove_validator(&address)?;
            }
            ConsensusMessage::Vote(vote) => {
                self.supervisor.add_vote(vote)?;
            }
            ConsensusMessage::Transaction(tx) => {
                if !tx.verify_signature() {
                    return Err(ConsensusError::InvalidSubmission(format!(
                        "bad signature from {}",
                        tx.sender()
                    )));
                }
                let pending = self.supervisor.mempool().add_tx(tx)?;
                tracing::trace!("Accepted tx from {}, {} pending", from, pending);
            }
            ConsensusMessage::Heartbeat { height } => {
                tracing::trace!("Heartbeat from {} at height {}", from, height);
            }
            other => return Err(ConsensusError::UnexpectedMessage(other.opcode())),
        }
        Ok(())
    }
}

/// Child block verification for a validator
pub struct ValidatorHandler {
    validator: Arc<ValidatorNode>,
}

impl ValidatorHandler {
    pub fn new(validator: Arc<ValidatorNode>) -> Self {
        Self { validator }
    }

    pub fn register(self, dispatcher: &Dispatcher) {
        let handler: Arc<dyn MessageHandler> = Arc::new(self);
        dispatcher.register(Opcode::ChildBlock, handler.clone());
        dispatcher.register(Opcode::Heartbeat, handler);
    }
}

#[async_trait]
impl MessageHandler for ValidatorHandler {
    async fn handle(
        &self,
        from: Address,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        match message {
            ConsensusMessage::ChildBlock(block) => {
                self.validator.handle_child_block(from, block).await
            }
            ConsensusMessage::Heartbeat { height } => {
                tracing::trace!("Heartbeat for height {}", height);
                Ok(())
            }
            other => Err(ConsensusError::UnexpectedMessage(other.opcode())),
        }
    }
}
