//! WebSocket transport between the supervisor and its validators
//!
//! The supervisor runs [`BroadcastServer`], validators and clients connect
//! with [`BroadcastClient`]. Both sides open with a signed hello so every
//! connection is bound to a public key, and the address derived from it
//! is what the rest of the node routes by.

use crate::error::NetworkError;
use crate::network::{Dispatcher, Network};
use crate::types::{hello_sign_bytes, ConsensusMessage, NodeRole, Opcode};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use shard_primitives::{Address, PrivKey, PubKey};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, connect_async};

/// Outbound frames buffered per connection
const CHANNEL_CAPACITY: usize = 1000;

/// Time a peer gets to identify itself
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Encoded hello frame proving ownership of `priv_key`
fn hello_frame(priv_key: &PrivKey, role: NodeRole) -> anyhow::Result<Vec<u8>> {
    let pub_key = priv_key.pub_key();
    let signature = priv_key.sign(&hello_sign_bytes(&pub_key))?;
    let hello = ConsensusMessage::Hello {
        pub_key,
        role,
        signature,
    };
    Ok(hello.to_bytes()?)
}

fn check_hello(data: &[u8]) -> Result<(PubKey, NodeRole), NetworkError> {
    match ConsensusMessage::from_bytes(data)? {
        ConsensusMessage::Hello {
            pub_key,
            role,
            signature,
        } => {
            if pub_key.verify_bytes(&hello_sign_bytes(&pub_key), &signature) {
                Ok((pub_key, role))
            } else {
                Err(NetworkError::Handshake(format!(
                    "bad hello signature from {}",
                    pub_key.address()
                )))
            }
        }
        other => Err(NetworkError::Handshake(format!(
            "expected hello, got {:?}",
            other.opcode()
        ))),
    }
}

async fn next_hello<S>(receiver: &mut S) -> anyhow::Result<(PubKey, NodeRole)>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(check_hello(&data)?),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => {
                return Err(NetworkError::Handshake(format!("unexpected frame: {:?}", other)).into())
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(NetworkError::Closed.into()),
        }
    }
}

async fn read_hello<S>(receiver: &mut S) -> anyhow::Result<(PubKey, NodeRole)>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(HELLO_TIMEOUT, next_hello(receiver))
        .await
        .map_err(|_| NetworkError::Handshake("timed out waiting for hello".to_string()))?
}

#[derive(Debug, Clone)]
struct PeerInfo {
    sender: mpsc::Sender<Vec<u8>>,
    role: NodeRole,
    connected_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub peers_connected: usize,
}

/// Broadcast server (run by the supervisor)
pub struct BroadcastServer {
    address: Address,
    /// Signed hello sent back to every peer
    hello: Vec<u8>,
    dispatcher: Arc<Dispatcher>,
    /// Authenticated peers by address
    peers: Arc<RwLock<HashMap<Address, PeerInfo>>>,
    stats: Arc<RwLock<ServerStats>>,
}

impl BroadcastServer {
    /// Create a new broadcast server
    pub fn new(priv_key: &PrivKey, dispatcher: Arc<Dispatcher>) -> anyhow::Result<Self> {
        Ok(Self {
            address: priv_key.pub_key().address(),
            hello: hello_frame(priv_key, NodeRole::Supervisor)?,
            dispatcher,
            peers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Start listening for connections; returns the bound address
    pub async fn start(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Broadcast server listening on {}", local_addr);

        let hello = self.hello.clone();
        let dispatcher = self.dispatcher.clone();
        let peers = self.peers.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Connection from {}", peer_addr);
                        let hello = hello.clone();
                        let dispatcher = dispatcher.clone();
                        let peers = peers.clone();
                        let stats = stats.clone();

                        tokio::spawn(async move {
                            let connection =
                                handle_peer_connection(stream, hello, dispatcher, peers, stats);
                            if let Err(e) = connection.await {
                                tracing::warn!("Connection from {} failed: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Get number of authenticated connections
    pub fn connected_peers(&self) -> usize {
        self.peers.read().len()
    }

    /// Get number of connected validators
    pub fn connected_validators(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|p| p.role == NodeRole::Validator)
            .count()
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().clone();
        stats.peers_connected = self.connected_peers();
        stats
    }

    async fn deliver(
        &self,
        senders: Vec<(Address, mpsc::Sender<Vec<u8>>)>,
        data: Vec<u8>,
    ) -> usize {
        let mut delivered = 0;
        for (address, sender) in senders {
            if sender.send(data.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::debug!("Peer {} went away before delivery", address);
            }
        }
        self.stats.write().messages_sent += delivered as u64;
        delivered
    }
}

#[async_trait]
impl Network for BroadcastServer {
    fn local_address(&self) -> Address {
        self.address
    }

    async fn send_to(
        &self,
        addresses: &[Address],
        message: ConsensusMessage,
    ) -> Result<(), NetworkError> {
        let data = message.to_bytes()?;
        let senders = {
            let peers = self.peers.read();
            addresses
                .iter()
                .map(|address| {
                    peers
                        .get(address)
                        .map(|p| (*address, p.sender.clone()))
                        .ok_or(NetworkError::UnknownPeer(*address))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        let expected = senders.len();
        if self.deliver(senders, data).await < expected {
            return Err(NetworkError::Closed);
        }
        Ok(())
    }

    async fn broadcast(&self, message: ConsensusMessage) -> Result<(), NetworkError> {
        let data = message.to_bytes()?;
        let senders: Vec<(Address, mpsc::Sender<Vec<u8>>)> = self
            .peers
            .read()
            .iter()
            .map(|(address, p)| (*address, p.sender.clone()))
            .collect();
        let n = self.deliver(senders, data).await;
        tracing::trace!("Broadcast {:?} to {} peers", message.opcode(), n);
        Ok(())
    }
}

async fn handle_peer_connection(
    stream: TcpStream,
    hello: Vec<u8>,
    dispatcher: Arc<Dispatcher>,
    peers: Arc<RwLock<HashMap<Address, PeerInfo>>>,
    stats: Arc<RwLock<ServerStats>>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (pub_key, role) = read_hello(&mut ws_receiver).await?;
    ws_sender.send(Message::Binary(hello)).await?;
    let address = pub_key.address();

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let previous = peers.write().insert(
        address,
        PeerInfo {
            sender: tx.clone(),
            role,
            connected_at: chrono::Utc::now().timestamp(),
        },
    );
    if previous.is_some() {
        tracing::warn!("Peer {} reconnected, replacing old connection", address);
    }
    tracing::info!("Peer {} identified as {:?}", address, role);

    if role == NodeRole::Validator && previous.is_none() {
        dispatcher.spawn_dispatch(address, ConsensusMessage::PeerConnected { pub_key });
    }

    // Forward queued frames to this peer
    let send_task = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => match ConsensusMessage::from_bytes(&data) {
                Ok(message) if message.is_local_only() || message.opcode() == Opcode::Hello => {
                    tracing::warn!("Ignoring {:?} from {}", message.opcode(), address);
                }
                Ok(message) => {
                    stats.write().messages_received += 1;
                    dispatcher.spawn_dispatch(address, message);
                }
                Err(e) => {
                    tracing::warn!("Undecodable message from {}: {}", address, e);
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", address, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup, unless a newer connection already took this address over
    send_task.abort();
    let removed = {
        let mut peers = peers.write();
        let current = peers
            .get(&address)
            .is_some_and(|p| p.sender.same_channel(&tx));
        if current {
            peers.remove(&address)
        } else {
            None
        }
    };
    if let Some(peer) = removed {
        tracing::info!(
            "Peer {} disconnected after {}s",
            address,
            chrono::Utc::now().timestamp() - peer.connected_at
        );
        if role == NodeRole::Validator {
            dispatcher.spawn_dispatch(address, ConsensusMessage::PeerDisconnected { address });
        }
    }

    Ok(())
}

/// Broadcast client (run by validators and transaction submitters)
pub struct BroadcastClient {
    address: Address,
    /// Address the supervisor proved in its hello
    supervisor: Address,
    /// Channel to send frames to the supervisor
    msg_tx: mpsc::Sender<Vec<u8>>,
    /// Flips to `true` once the connection is gone
    closed: watch::Receiver<bool>,
}

impl BroadcastClient {
    /// Connect to the supervisor's broadcast server
    ///
    /// Inbound messages go to `dispatcher`, tagged with the supervisor's
    /// address.
    pub async fn connect(
        supervisor_addr: &str,
        priv_key: &PrivKey,
        role: NodeRole,
        dispatcher: Arc<Dispatcher>,
    ) -> anyhow::Result<Self> {
        let url = format!("ws://{}", supervisor_addr);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        ws_sender
            .send(Message::Binary(hello_frame(priv_key, role)?))
            .await?;
        let (supervisor_key, supervisor_role) = read_hello(&mut ws_receiver).await?;
        if supervisor_role != NodeRole::Supervisor {
            return Err(NetworkError::Handshake(format!(
                "{} answered as {:?}",
                supervisor_addr, supervisor_role
            ))
            .into());
        }
        let supervisor = supervisor_key.address();
        tracing::info!("Connected to supervisor {} at {}", supervisor, supervisor_addr);

        let (msg_tx, mut msg_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
        let (closed_tx, closed) = watch::channel(false);

        // Spawn receiver task
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match ConsensusMessage::from_bytes(&data) {
                        Ok(message) if message.is_local_only() => {
                            tracing::warn!("Ignoring {:?} from supervisor", message.opcode());
                        }
                        Ok(message) => {
                            dispatcher.spawn_dispatch(supervisor, message);
                        }
                        Err(e) => tracing::warn!("Undecodable message from supervisor: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::warn!("Supervisor closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            let _ = closed_tx.send(true);
        });

        // Spawn sender task; the handle going away closes the connection
        tokio::spawn(async move {
            while let Some(data) = msg_rx.recv().await {
                if ws_sender.send(Message::Binary(data)).await.is_err() {
                    return;
                }
            }
            let _ = ws_sender.send(Message::Close(None)).await;
        });

        Ok(Self {
            address: priv_key.pub_key().address(),
            supervisor,
            msg_tx,
            closed,
        })
    }

    pub fn supervisor_address(&self) -> Address {
        self.supervisor
    }

    pub fn is_connected(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Wait until the connection to the supervisor is lost
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Flush queued frames, close the connection and wait for the supervisor to hang up
    pub async fn shutdown(self) {
        let Self {
            msg_tx, mut closed, ..
        } = self;
        drop(msg_tx);
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn send_frame(&self, message: &ConsensusMessage) -> Result<(), NetworkError> {
        let data = message.to_bytes()?;
        self.msg_tx.send(data).await.map_err(|_| NetworkError::Closed)
    }
}

#[async_trait]
impl Network for BroadcastClient {
    fn local_address(&self) -> Address {
        self.address
    }

    async fn send_to(
        &self,
        addresses: &[Address],
        message: ConsensusMessage,
    ) -> Result<(), NetworkError> {
        if let Some(unknown) = addresses.iter().find(|a| **a != self.supervisor) {
            return Err(NetworkError::UnknownPeer(*unknown));
        }
        if addresses.is_empty() {
            return Ok(());
        }
        self.send_frame(&message).await
    }

    async fn broadcast(&self, message: ConsensusMessage) -> Result<(), NetworkError> {
        self.send_frame(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsensusError;
    use crate::network::MessageHandler;
    use shard_primitives::KeyKind;

    struct Forward {
        tx: mpsc::UnboundedSender<(Address, ConsensusMessage)>,
    }

    #[async_trait]
    impl MessageHandler for Forward {
        async fn handle(
            &self,
            from: Address,
            message: ConsensusMessage,
        ) -> Result<(), ConsensusError> {
            let _ = self.tx.send((from, message));
            Ok(())
        }
    }

    fn forwarding(
        opcodes: &[Opcode],
    ) -> (Arc<Dispatcher>, mpsc::UnboundedReceiver<(Address, ConsensusMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(Forward { tx });
        for opcode in opcodes {
            dispatcher.register(*opcode, handler.clone());
        }
        (dispatcher, rx)
    }

    #[test]
    fn test_hello_rejects_wrong_key() {
        let key = PrivKey::generate(KeyKind::Ed25519);
        let other = PrivKey::generate(KeyKind::Ed25519);
        let signature = other.sign(&hello_sign_bytes(&key.pub_key())).unwrap();
        let forged = ConsensusMessage::Hello {
            pub_key: key.pub_key(),
            role: NodeRole::Validator,
            signature,
        };
        assert!(matches!(
            check_hello(&forged.to_bytes().unwrap()),
            Err(NetworkError::Handshake(_))
        ));

        let good = hello_frame(&key, NodeRole::Validator).unwrap();
        let (pub_key, role) = check_hello(&good).unwrap();
        assert_eq!(pub_key, key.pub_key());
        assert_eq!(role, NodeRole::Validator);
    }

    #[tokio::test]
    async fn test_validator_connect_exchange_and_disconnect() {
        let server_key = PrivKey::generate(KeyKind::Ed25519);
        let (server_dispatcher, mut server_rx) = forwarding(&[
            Opcode::PeerConnected,
            Opcode::PeerDisconnected,
            Opcode::Heartbeat,
        ]);
        let server = BroadcastServer::new(&server_key, server_dispatcher).unwrap();
        let bound = server.start("127.0.0.1:0").await.unwrap();

        let client_key = PrivKey::generate(KeyKind::Secp256k1);
        let client_address = client_key.pub_key().address();
        let (client_dispatcher, mut client_rx) = forwarding(&[Opcode::Heartbeat]);
        let client = BroadcastClient::connect(
            &bound.to_string(),
            &client_key,
            NodeRole::Validator,
            client_dispatcher,
        )
        .await
        .unwrap();
        assert_eq!(client.supervisor_address(), server_key.pub_key().address());

        let (from, msg) = server_rx.recv().await.unwrap();
        assert_eq!(from, client_address);
        assert_eq!(
            msg,
            ConsensusMessage::PeerConnected {
                pub_key: client_key.pub_key()
            }
        );
        assert_eq!(server.connected_validators(), 1);

        server
            .send_to(&[client_address], ConsensusMessage::Heartbeat { height: 3 })
            .await
            .unwrap();
        let (from, msg) = client_rx.recv().await.unwrap();
        assert_eq!(from, server_key.pub_key().address());
        assert_eq!(msg, ConsensusMessage::Heartbeat { height: 3 });

        client
            .broadcast(ConsensusMessage::Heartbeat { height: 4 })
            .await
            .unwrap();
        let (from, msg) = server_rx.recv().await.unwrap();
        assert_eq!(from, client_address);
        assert_eq!(msg, ConsensusMessage::Heartbeat { height: 4 });

        client.shutdown().await;
        let (_, msg) = server_rx.recv().await.unwrap();
        assert_eq!(
            msg,
            ConsensusMessage::PeerDisconnected {
                address: client_address
            }
        );
        assert_eq!(server.connected_peers(), 0);
    }

    #[tokio::test]
    async fn test_client_role_is_not_a_validator() {
        let server_key = PrivKey::generate(KeyKind::Ed25519);
        let (server_dispatcher, mut server_rx) =
            forwarding(&[Opcode::PeerConnected, Opcode::Transaction]);
        let server = BroadcastServer::new(&server_key, server_dispatcher).unwrap();
        let bound = server.start("127.0.0.1:0").await.unwrap();

        let key = PrivKey::generate(KeyKind::Ed25519);
        let client =
            BroadcastClient::connect(&bound.to_string(), &key, NodeRole::Client, Dispatcher::new())
                .await
                .unwrap();
        let tx = shard_primitives::SignedTransaction::sign(&key, 0, b"hi".to_vec()).unwrap();
        client
            .broadcast(ConsensusMessage::Transaction(tx.clone()))
            .await
            .unwrap();

        let (_, msg) = server_rx.recv().await.unwrap();
        assert_eq!(msg, ConsensusMessage::Transaction(tx));
        assert_eq!(server.connected_validators(), 0);
        assert!(client
            .send_to(&[Address([1u8; 20])], ConsensusMessage::Heartbeat { height: 0 })
            .await
            .is_err());
    }
}
