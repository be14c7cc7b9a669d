//! Network contract, handler dispatch and the in-process transport
//!
//! Transports deliver every inbound message to a [`Dispatcher`], which
//! looks up the handler registered for the message's [`Opcode`] and runs
//! it on its own task.

use crate::error::{ConsensusError, NetworkError};
use crate::types::{ConsensusMessage, Opcode};
use async_trait::async_trait;
use parking_lot::RwLock;
use shard_primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Addressed message delivery between nodes
#[async_trait]
pub trait Network: Send + Sync {
    /// This node's address, derived from its public key
    fn local_address(&self) -> Address;

    /// Deliver `message` to each of `addresses`
    async fn send_to(
        &self,
        addresses: &[Address],
        message: ConsensusMessage,
    ) -> Result<(), NetworkError>;

    /// Deliver `message` to every connected peer
    async fn broadcast(&self, message: ConsensusMessage) -> Result<(), NetworkError>;
}

/// Reaction to one kind of inbound message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, from: Address, message: ConsensusMessage) -> Result<(), ConsensusError>;
}

/// Opcode to handler registry
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<Opcode, Arc<dyn MessageHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `handler` for `opcode`, replacing any previous one
    pub fn register(&self, opcode: Opcode, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().insert(opcode, handler);
    }

    /// Run the handler for `message` to completion
    pub async fn dispatch(
        &self,
        from: Address,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        let opcode = message.opcode();
        let handler = self
            .handlers
            .read()
            .get(&opcode)
            .cloned()
            .ok_or(NetworkError::NoHandler(opcode))?;
        handler.handle(from, message).await
    }

    /// Run the handler on a fresh task, logging its failure
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        from: Address,
        message: ConsensusMessage,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let opcode = message.opcode();
            if let Err(e) = dispatcher.dispatch(from, message).await {
                tracing::warn!("{:?} from {} failed: {}", opcode, from, e);
            }
        })
    }
}

/// In-process switchboard connecting [`LocalNetwork`] endpoints
#[derive(Default)]
pub struct LocalHub {
    peers: RwLock<HashMap<Address, Arc<Dispatcher>>>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node; messages for `address` go to `dispatcher`
    pub fn join(self: &Arc<Self>, address: Address, dispatcher: Arc<Dispatcher>) -> LocalNetwork {
        self.peers.write().insert(address, dispatcher);
        tracing::debug!("Local peer {} joined", address);
        LocalNetwork {
            hub: self.clone(),
            address,
        }
    }
}

/// A node's endpoint on a [`LocalHub`]
pub struct LocalNetwork {
    hub: Arc<LocalHub>,
    address: Address,
}

impl LocalNetwork {
    fn deliver(&self, targets: Vec<Arc<Dispatcher>>, message: ConsensusMessage) {
        for dispatcher in targets {
            dispatcher.spawn_dispatch(self.address, message.clone());
        }
    }
}

#[async_trait]
impl Network for LocalNetwork {
    fn local_address(&self) -> Address {
        self.address
    }

    async fn send_to(
        &self,
        addresses: &[Address],
        message: ConsensusMessage,
    ) -> Result<(), NetworkError> {
        let targets = {
            let peers = self.hub.peers.read();
            addresses
                .iter()
                .map(|address| {
                    peers
                        .get(address)
                        .cloned()
                        .ok_or(NetworkError::UnknownPeer(*address))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        self.deliver(targets, message);
        Ok(())
    }

    async fn broadcast(&self, message: ConsensusMessage) -> Result<(), NetworkError> {
        let targets: Vec<Arc<Dispatcher>> = self
            .hub
            .peers
            .read()
            .iter()
            .filter(|(address, _)| **address != self.address)
            .map(|(_, dispatcher)| dispatcher.clone())
            .collect();
        self.deliver(targets, message);
        Ok(())
    }
}
