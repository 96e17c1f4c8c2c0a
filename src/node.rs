//! The node driver: single-writer consensus with parallel I/O fan-out.
//!
//! Four inbound channels feed a `select` loop: announced block hashes,
//! announced transaction hashes, locally mined blocks, and locally
//! submitted transactions. Unknown block hashes enter an in-memory
//! `frontier` and get a worker task; each worker prefetches its block in
//! parallel, then awaits the single chain-mutation permit, so exactly one
//! adoption (and thus one reorg) runs at a time. Completion messages
//! return the hash to the driver, which clears it from the frontier.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::chain::Block;
use crate::consensus::{Engine, EngineError, HashRequest};
use crate::network::peer::PeerClient;
use crate::transaction::Txn;
use crate::Hash;

/// Sending sides of the node's inbound channels.
#[derive(Clone)]
pub struct NodeHandles {
    pub block_hashes: mpsc::Sender<HashRequest>,
    pub txn_hashes: mpsc::Sender<HashRequest>,
    pub mined_blocks: mpsc::Sender<Block>,
    pub local_txns: mpsc::Sender<Txn>,
}

/// The driver owning the receive sides.
pub struct Node {
    engine: Arc<Engine>,
    peers: Option<Arc<PeerClient>>,
    block_hashes: mpsc::Receiver<HashRequest>,
    txn_hashes: mpsc::Receiver<HashRequest>,
    mined_blocks: mpsc::Receiver<Block>,
    local_txns: mpsc::Receiver<Txn>,
}

impl Node {
    pub fn new(engine: Arc<Engine>, peers: Option<Arc<PeerClient>>) -> (Node, NodeHandles) {
        let (block_hash_tx, block_hash_rx) = mpsc::channel(256);
        let (txn_hash_tx, txn_hash_rx) = mpsc::channel(256);
        let (mined_tx, mined_rx) = mpsc::channel(16);
        let (txn_tx, txn_rx) = mpsc::channel(64);
        (
            Node {
                engine,
                peers,
                block_hashes: block_hash_rx,
                txn_hashes: txn_hash_rx,
                mined_blocks: mined_rx,
                local_txns: txn_rx,
            },
            NodeHandles {
                block_hashes: block_hash_tx,
                txn_hashes: txn_hash_tx,
                mined_blocks: mined_tx,
                local_txns: txn_tx,
            },
        )
    }

    /// The driver loop. Runs until every inbound channel closes.
    pub async fn run(mut self) {
        let mut frontier: HashSet<Hash> = HashSet::new();
        let (done_tx, mut done_rx) = mpsc::channel::<Hash>(64);
        // The single-writer token: one chain mutation at a time.
        let write_permit = Arc::new(Semaphore::new(1));

        loop {
            tokio::select! {
                Some(req) = self.block_hashes.recv() => {
                    self.spawn_block_worker(req, &mut frontier, &done_tx, &write_permit);
                }
                Some(req) = self.txn_hashes.recv() => {
                    self.spawn_txn_worker(req, &write_permit);
                }
                Some(block) = self.mined_blocks.recv() => {
                    let hash = self.engine.offer_block(block);
                    let req = HashRequest { sender: String::new(), hash };
                    self.spawn_block_worker(req, &mut frontier, &done_tx, &write_permit);
                }
                Some(txn) = self.local_txns.recv() => {
                    self.spawn_local_txn_worker(txn, &write_permit);
                }
                Some(hash) = done_rx.recv() => {
                    frontier.remove(&hash);
                }
                else => break,
            }
        }
        tracing::info!("node driver shutting down");
    }

    fn spawn_block_worker(
        &self,
        req: HashRequest,
        frontier: &mut HashSet<Hash>,
        done_tx: &mpsc::Sender<Hash>,
        write_permit: &Arc<Semaphore>,
    ) {
        if frontier.contains(&req.hash) {
            return;
        }
        if self.engine.is_known(&req.hash) {
            return;
        }
        frontier.insert(req.hash);

        let engine = Arc::clone(&self.engine);
        let peers = self.peers.clone();
        let done = done_tx.clone();
        let permit = Arc::clone(write_permit);
        tokio::spawn(async move {
            // Fetch I/O runs outside the critical section.
            engine.prefetch_block(&req).await;

            let adopted = {
                let _token = permit.acquire_owned().await.expect("permit");
                match engine.add_or_orphan(req.clone()).await {
                    Ok(adopted) => adopted,
                    Err(EngineError::Transient(e)) => {
                        tracing::debug!(error = %e, "block resolution deferred");
                        false
                    }
                    Err(EngineError::Fatal(e)) => {
                        tracing::error!(error = %e, "fatal engine failure; aborting");
                        std::process::exit(1);
                    }
                }
            };
            if adopted {
                if let Some(peers) = peers {
                    peers.broadcast_block(req.hash).await;
                }
            }
            let _ = done.send(req.hash).await;
        });
    }

    fn spawn_txn_worker(&self, req: HashRequest, write_permit: &Arc<Semaphore>) {
        let engine = Arc::clone(&self.engine);
        let peers = self.peers.clone();
        let permit = Arc::clone(write_permit);
        tokio::spawn(async move {
            let Some(peers_ref) = &peers else {
                return;
            };
            let txn = if !req.sender.is_empty() {
                match peers_ref.fetch_txn(&req.hash, &req.sender).await {
                    Ok(txn) => txn,
                    Err(_) => match peers_ref.find_txn(&req.hash).await {
                        Some(txn) => txn,
                        None => return,
                    },
                }
            } else {
                match peers_ref.find_txn(&req.hash).await {
                    Some(txn) => txn,
                    None => return,
                }
            };

            let admitted = {
                let _token = permit.acquire_owned().await.expect("permit");
                engine.admit_txn(&txn).await.unwrap_or(false)
            };
            if admitted {
                peers_ref.broadcast_txn(req.hash).await;
            }
        });
    }

    fn spawn_local_txn_worker(&self, txn: Txn, write_permit: &Arc<Semaphore>) {
        let engine = Arc::clone(&self.engine);
        let peers = self.peers.clone();
        let permit = Arc::clone(write_permit);
        tokio::spawn(async move {
            let hash = txn.hash();
            let admitted = {
                let _token = permit.acquire_owned().await.expect("permit");
                match engine.admit_txn(&txn).await {
                    Ok(admitted) => admitted,
                    Err(e) => {
                        tracing::warn!(error = %e, "local txn rejected");
                        false
                    }
                }
            };
            if admitted {
                if let Some(peers) = peers {
                    peers.broadcast_txn(hash).await;
                }
            }
        });
    }
}
