//! Peer I/O: the gossip listener and the outbound fetch/broadcast client.
//!
//! Connections are one-shot: dial, write a single request frame, read the
//! response. Peers are learned from the sender address on every inbound
//! request and dropped from the peer book when a dial fails. Every fetched
//! object is verified against the requested hash (blocks additionally
//! against their merkle root) before it is trusted.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::chain::{Block, BlockHeader};
use crate::consensus::HashRequest;
use crate::constants::PEER_DIAL_TIMEOUT_MS;
use crate::storage::{ChainStore, Section};
use crate::transaction::{Output, Txn};
use crate::{Hash, ZERO_HASH};

use super::protocol::{read_frame, write_frame, Message, NetworkError};

/// Outbound request client over the peer book.
pub struct PeerClient {
    store: Arc<ChainStore>,
    local_addr: String,
}

impl PeerClient {
    pub fn new(store: Arc<ChainStore>, local_addr: String) -> Self {
        PeerClient { store, local_addr }
    }

    /// Dial a peer, send one request, read one response. A failed dial
    /// evicts the peer from the book.
    async fn call(&self, address: &str, msg: Message) -> Result<Message, NetworkError> {
        let dial = timeout(
            Duration::from_millis(PEER_DIAL_TIMEOUT_MS),
            TcpStream::connect(address),
        )
        .await;
        let mut stream = match dial {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.evict(address);
                return Err(NetworkError::Io(e));
            }
            Err(_) => {
                self.evict(address);
                return Err(NetworkError::DialTimeout);
            }
        };
        write_frame(&mut stream, &msg).await?;
        read_frame(&mut stream).await
    }

    fn evict(&self, address: &str) {
        if let Err(e) = self.store.remove_peer(address) {
            tracing::warn!(peer = address, error = %e, "failed to evict peer");
        } else {
            tracing::debug!(peer = address, "evicted unreachable peer");
        }
    }

    /// Fetch a main-chain header and verify it hashes to the request.
    pub async fn fetch_header(
        &self,
        hash: &Hash,
        address: &str,
    ) -> Result<BlockHeader, NetworkError> {
        let resp = self
            .call(
                address,
                Message::FetchHeader {
                    sender: self.local_addr.clone(),
                    hash: *hash,
                },
            )
            .await?;
        match resp {
            Message::HeaderResp { header: Some(header), .. } => {
                if header.hash() != *hash {
                    return Err(NetworkError::HashMismatch);
                }
                Ok(header)
            }
            Message::HeaderResp { header: None, .. } => Err(NetworkError::NotFound),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Fetch a block; verify its hash and merkle root.
    pub async fn fetch_block(&self, hash: &Hash, address: &str) -> Result<Block, NetworkError> {
        let resp = self
            .call(
                address,
                Message::FetchBlock {
                    sender: self.local_addr.clone(),
                    hash: *hash,
                },
            )
            .await?;
        match resp {
            Message::BlockResp { block: Some(block), .. } => {
                if block.hash() != *hash {
                    return Err(NetworkError::HashMismatch);
                }
                if !block.verify_merkle() {
                    return Err(NetworkError::BadMerkle);
                }
                Ok(*block)
            }
            Message::BlockResp { block: None, .. } => Err(NetworkError::NotFound),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Fetch a transaction and verify its hash.
    pub async fn fetch_txn(&self, hash: &Hash, address: &str) -> Result<Txn, NetworkError> {
        let resp = self
            .call(
                address,
                Message::FetchTxn {
                    sender: self.local_addr.clone(),
                    hash: *hash,
                },
            )
            .await?;
        match resp {
            Message::TxnResp { txn: Some(txn), .. } => {
                if txn.hash() != *hash {
                    return Err(NetworkError::HashMismatch);
                }
                Ok(*txn)
            }
            Message::TxnResp { txn: None, .. } => Err(NetworkError::NotFound),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Fetch an output and verify its hash.
    pub async fn fetch_output(&self, hash: &Hash, address: &str) -> Result<Output, NetworkError> {
        let resp = self
            .call(
                address,
                Message::FetchOutput {
                    sender: self.local_addr.clone(),
                    hash: *hash,
                },
            )
            .await?;
        match resp {
            Message::OutputResp { output: Some(output), .. } => {
                if output.hash() != *hash {
                    return Err(NetworkError::HashMismatch);
                }
                Ok(*output)
            }
            Message::OutputResp { output: None, .. } => Err(NetworkError::NotFound),
            _ => Err(NetworkError::UnexpectedResponse),
        }
    }

    /// Try local storage, then every known peer, for a block.
    pub async fn find_block(&self, hash: &Hash) -> Option<Block> {
        if let Ok(Some(block)) = self.store.lookup_block(hash) {
            return Some(block);
        }
        for peer in self.store.peers().ok()? {
            if let Ok(block) = self.fetch_block(hash, &peer).await {
                return Some(block);
            }
        }
        None
    }

    /// Try local storage, then every known peer, for an output.
    pub async fn find_output(&self, hash: &Hash) -> Option<Output> {
        if let Ok(Some(output)) = self.store.output(hash) {
            return Some(output);
        }
        for peer in self.store.peers().ok()? {
            if let Ok(output) = self.fetch_output(hash, &peer).await {
                return Some(output);
            }
        }
        None
    }

    /// Try local storage, then every known peer, for a transaction.
    pub async fn find_txn(&self, hash: &Hash) -> Option<Txn> {
        if let Ok(Some(txn)) = self.store.txn(hash) {
            return Some(txn);
        }
        for peer in self.store.peers().ok()? {
            if let Ok(txn) = self.fetch_txn(hash, &peer).await {
                return Some(txn);
            }
        }
        None
    }

    /// Announce a block hash to every known peer (best-effort, unordered).
    pub async fn broadcast_block(&self, hash: Hash) {
        self.broadcast(hash, true).await;
    }

    /// Announce a transaction hash to every known peer.
    pub async fn broadcast_txn(&self, hash: Hash) {
        self.broadcast(hash, false).await;
    }

    async fn broadcast(&self, hash: Hash, block: bool) {
        let peers = match self.store.peers() {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read peer book for broadcast");
                return;
            }
        };
        for peer in peers {
            let msg = if block {
                Message::BcastBlock {
                    sender: self.local_addr.clone(),
                    hash,
                }
            } else {
                Message::BcastTxn {
                    sender: self.local_addr.clone(),
                    hash,
                }
            };
            if let Err(e) = self.call(&peer, msg).await {
                tracing::debug!(peer = %peer, error = %e, "broadcast failed");
            }
        }
    }
}

/// Inbound gossip listener: answers fetches from storage and funnels
/// broadcast hashes into the node's resolution channels.
pub struct GossipServer {
    store: Arc<ChainStore>,
    local_addr: String,
    block_hashes: mpsc::Sender<HashRequest>,
    txn_hashes: mpsc::Sender<HashRequest>,
}

impl GossipServer {
    pub fn new(
        store: Arc<ChainStore>,
        local_addr: String,
        block_hashes: mpsc::Sender<HashRequest>,
        txn_hashes: mpsc::Sender<HashRequest>,
    ) -> Self {
        GossipServer {
            store,
            local_addr,
            block_hashes,
            txn_hashes,
        }
    }

    /// Accept loop; one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        tracing::info!(addr = %self.local_addr, "gossip listener up");
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_conn(stream).await {
                            tracing::debug!(remote = %remote, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }

    async fn handle_conn(&self, mut stream: TcpStream) -> Result<(), NetworkError> {
        let request = read_frame(&mut stream).await?;

        // Remember whoever talked to us.
        let sender = request.sender().to_string();
        if !sender.is_empty() && sender != self.local_addr {
            if let Err(e) = self.store.add_peer(&sender) {
                tracing::warn!(peer = %sender, error = %e, "failed to record peer");
            }
        }

        let response = match request {
            Message::BcastBlock { hash, .. } => {
                if hash != ZERO_HASH {
                    let _ = self
                        .block_hashes
                        .send(HashRequest { sender, hash })
                        .await;
                }
                Message::Ack {
                    sender: self.local_addr.clone(),
                }
            }
            Message::BcastTxn { hash, .. } => {
                if hash != ZERO_HASH {
                    let _ = self.txn_hashes.send(HashRequest { sender, hash }).await;
                }
                Message::Ack {
                    sender: self.local_addr.clone(),
                }
            }
            Message::FetchHeader { hash, .. } => Message::HeaderResp {
                sender: self.local_addr.clone(),
                // Header fetches serve the main chain only
                header: self.store.header(Section::Main, &hash).unwrap_or(None),
            },
            Message::FetchBlock { hash, .. } => Message::BlockResp {
                sender: self.local_addr.clone(),
                block: self.store.lookup_block(&hash).unwrap_or(None).map(Box::new),
            },
            Message::FetchTxn { hash, .. } => Message::TxnResp {
                sender: self.local_addr.clone(),
                txn: self.store.txn(&hash).unwrap_or(None).map(Box::new),
            },
            Message::FetchOutput { hash, .. } => Message::OutputResp {
                sender: self.local_addr.clone(),
                output: self.store.output(&hash).unwrap_or(None).map(Box::new),
            },
            // Response variants are not valid requests
            other => {
                tracing::debug!(msg = ?other, "ignoring non-request frame");
                return Ok(());
            }
        };
        write_frame(&mut stream, &response).await
    }
}
