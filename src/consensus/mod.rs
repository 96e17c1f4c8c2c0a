//! The consensus engine: serialized adoption of blocks into the main,
//! side, or orphan partition, with atomic reorganization when a side chain
//! overtakes the main chain on total difficulty.
//!
//! Placement of an incoming block:
//! - parent is the current tip (or the block is genesis on an empty store):
//!   extend the main chain;
//! - parent is anywhere else in main, or on a side chain: extend (or start)
//!   a side chain, comparing total difficulties and reorganizing when the
//!   candidate outweighs main;
//! - parent unknown: recursively resolve the parent; on failure park the
//!   block in the orphan partition. Adopting a block re-enters resolution
//!   for any orphans that name it as parent.
//!
//! Callers must serialize chain mutation: the node driver admits one
//! worker at a time into [`Engine::add_or_orphan`], so reorganizations are
//! race-free while fetches and broadcasts stay parallel.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::chain::block::unix_now;
use crate::chain::{difficulty, Block, BlockHeader};
use crate::constants::MAX_HEADER_AGE_SEC;
use crate::crypto::curve::CurvePoint;
use crate::crypto::pedersen;
use crate::network::peer::PeerClient;
use crate::storage::{ChainStore, Section, StorageError};
use crate::transaction::{Output, Txn};
use crate::wallet::WalletEvent;
use crate::{constants, Hash, ZERO_HASH};

/// A hash to resolve, tagged with the address of whoever announced it.
#[derive(Clone, Debug)]
pub struct HashRequest {
    pub sender: String,
    pub hash: Hash,
}

/// Engine failures. `Transient` discards the work item (the next gossip
/// round re-announces it); `Fatal` means local state can no longer be
/// trusted and the node must abort.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<StorageError> for EngineError {
    /// Reads default to transient; mutation paths escalate explicitly.
    fn from(e: StorageError) -> Self {
        EngineError::Transient(e.to_string())
    }
}

fn fatal(e: StorageError) -> EngineError {
    EngineError::Fatal(e.to_string())
}

/// Spent-ness context for validating side-chain blocks: spends on the
/// would-be-demoted main segment are treated as still valid (their outputs
/// revert to unspent if the fork wins), while spends already on the
/// candidate side segment count against the new block.
#[derive(Default)]
pub struct ForkContext {
    /// Key-image hashes on the main path past the fork point.
    pub main_preimages: HashSet<Hash>,
    /// Outputs created on the side path (resolvable for ring members).
    pub side_outputs: HashMap<Hash, Output>,
    /// Key-image hashes already spent on the side path.
    pub side_preimages: HashSet<Hash>,
}

impl ForkContext {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The consensus engine. One logical writer: the node driver's permit
/// guarantees a single `add_or_orphan` mutates at a time.
pub struct Engine {
    store: Arc<ChainStore>,
    peers: Option<Arc<PeerClient>>,
    /// In-memory main-chain tip, mirrored to storage.
    last_header: Mutex<Option<BlockHeader>>,
    /// Locally produced blocks (miner) awaiting adoption.
    pending: Mutex<HashMap<Hash, Block>>,
    /// Block notifications toward the wallet, ordered after each mutation.
    wallet_tx: Option<mpsc::UnboundedSender<WalletEvent>>,
}

type AdoptFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, EngineError>> + Send + 'a>>;

impl Engine {
    pub fn new(
        store: Arc<ChainStore>,
        peers: Option<Arc<PeerClient>>,
        wallet_tx: Option<mpsc::UnboundedSender<WalletEvent>>,
    ) -> Result<Self, EngineError> {
        let tip = store.last_header()?;
        Ok(Engine {
            store,
            peers,
            last_header: Mutex::new(tip),
            pending: Mutex::new(HashMap::new()),
            wallet_tx,
        })
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    /// The current main-chain tip, if any block has been adopted.
    pub fn last_header(&self) -> Option<BlockHeader> {
        *self.last_header.lock().expect("tip lock")
    }

    /// Stage a locally produced block so resolution finds it without a
    /// network fetch. Returns its hash for the resolution request.
    pub fn offer_block(&self, block: Block) -> Hash {
        let hash = block.hash();
        self.pending.lock().expect("pending lock").insert(hash, block);
        hash
    }

    /// Whether a hash is already recorded in any partition (the driver's
    /// duplicate filter).
    pub fn is_known(&self, hash: &Hash) -> bool {
        matches!(self.store.lookup_header(hash), Ok(Some(_)))
    }

    // ── Validation predicates ──

    /// Stateless header checks: proof of work, staleness window, and the
    /// genesis predicate (zero parent exactly for height zero).
    pub fn valid_header(&self, header: &BlockHeader) -> bool {
        if !header.valid_pow() {
            tracing::debug!(seq = header.seq_num, "header fails PoW");
            return false;
        }
        if header.time.saturating_add(MAX_HEADER_AGE_SEC) < unix_now() {
            tracing::debug!(seq = header.seq_num, "header too old");
            return false;
        }
        if (header.seq_num == 0) != (header.prev_hash == ZERO_HASH) {
            tracing::debug!(seq = header.seq_num, "genesis predicate violated");
            return false;
        }
        true
    }

    /// Context-free block checks: merkle root, transaction shapes, and the
    /// coinbase committing to exactly subsidy plus fees with zero blinding.
    pub fn prevalid_block(&self, block: &Block) -> bool {
        if block.txns.is_empty() || !block.verify_merkle() {
            return false;
        }
        if !block.txns[0].is_coinbase() || block.txns[1..].iter().any(|t| t.is_coinbase()) {
            return false;
        }
        if !block.txns.iter().all(|t| t.validate_shape()) {
            return false;
        }
        let coinbase = &block.txns[0].body.outputs[0];
        let expected = constants::block_subsidy(block.header.seq_num) + block.total_fees();
        coinbase.commit.verify() && coinbase.commit.point == pedersen::value_point(expected)
    }

    // ── Resolution ──

    async fn load_or_fetch_block(&self, req: &HashRequest) -> Result<Block, EngineError> {
        if let Some(block) = self.pending.lock().expect("pending lock").get(&req.hash) {
            return Ok(block.clone());
        }
        if let Some(block) = self.store.lookup_block(&req.hash)? {
            return Ok(block);
        }
        let Some(peers) = &self.peers else {
            return Err(EngineError::Transient("block unavailable locally".into()));
        };
        if !req.sender.is_empty() {
            if let Ok(block) = peers.fetch_block(&req.hash, &req.sender).await {
                return Ok(block);
            }
        }
        peers
            .find_block(&req.hash)
            .await
            .ok_or_else(|| EngineError::Transient(format!("no peer served block {}", hex::encode(req.hash))))
    }

    /// Pull the block for `req` into the pending cache so the critical
    /// section finds it without suspending on peer I/O.
    pub async fn prefetch_block(&self, req: &HashRequest) {
        if self.pending.lock().expect("pending lock").contains_key(&req.hash) {
            return;
        }
        if matches!(self.store.lookup_block(&req.hash), Ok(Some(_))) {
            return;
        }
        let Some(peers) = &self.peers else { return };
        if req.sender.is_empty() {
            return;
        }
        if let Ok(block) = peers.fetch_block(&req.hash, &req.sender).await {
            self.offer_block(block);
        }
    }

    /// Resolve and place one announced block. Must run inside the node's
    /// single-writer critical section. After a successful adoption, any
    /// orphans waiting on this block re-enter resolution.
    pub async fn add_or_orphan(&self, req: HashRequest) -> Result<bool, EngineError> {
        let hash = req.hash;
        let adopted = self.adopt(req).await?;
        // Resolution finished: adopted, parked as an orphan, or rejected.
        // The staged copy is no longer needed in any of those outcomes.
        self.pending.lock().expect("pending lock").remove(&hash);
        if adopted {
            self.promote_orphans(hash).await;
        }
        Ok(adopted)
    }

    /// Walk orphans downward from a freshly adopted block, promoting every
    /// chain that reconnects.
    async fn promote_orphans(&self, parent: Hash) {
        let mut queue = vec![parent];
        while let Some(current) = queue.pop() {
            let children = match self.store.orphan_children(&current) {
                Ok(children) => children,
                Err(e) => {
                    tracing::warn!(error = %e, "orphan scan failed");
                    return;
                }
            };
            for child in children {
                let req = HashRequest {
                    sender: String::new(),
                    hash: child,
                };
                match self.adopt(req).await {
                    Ok(true) => {
                        tracing::info!(hash = %hex::encode(child), "orphan promoted");
                        queue.push(child);
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "orphan promotion failed"),
                }
            }
        }
    }

    /// Recursive placement; boxed because resolution of an unknown parent
    /// re-enters this function.
    fn adopt(&self, req: HashRequest) -> AdoptFuture<'_> {
        Box::pin(async move {
            // Already adopted into main or side
            match self.store.lookup_header(&req.hash)? {
                Some((Section::Main | Section::Side, _)) => return Ok(true),
                _ => {}
            }

            let block = self.load_or_fetch_block(&req).await?;
            if !self.valid_header(&block.header) {
                return Ok(false);
            }
            if !self.prevalid_block(&block) {
                tracing::debug!(hash = %hex::encode(req.hash), "block fails shape validation");
                return Ok(false);
            }

            let prev = block.header.prev_hash;
            let tip = self.last_header();

            // Genesis claims extend an empty chain only; a competing
            // genesis has no fork point in main and is rejected.
            if block.header.seq_num == 0 {
                return if tip.is_none() {
                    self.extend_main(&block).await
                } else {
                    tracing::debug!("rejecting competing genesis");
                    Ok(false)
                };
            }
            let Some(tip) = tip else {
                // Non-genesis before any genesis: park it
                self.store.apply_orphan(&block).map_err(fatal)?;
                return Ok(false);
            };

            if prev == tip.hash() {
                return self.extend_main(&block).await;
            }
            if self.store.header(Section::Main, &prev)?.is_some()
                || self.store.header(Section::Side, &prev)?.is_some()
            {
                return self.extend_side(&block).await;
            }

            // Unknown parent: resolve it recursively, orphan on failure.
            let parent_req = HashRequest {
                sender: req.sender.clone(),
                hash: prev,
            };
            let parent_adopted = match self.adopt(parent_req).await {
                Ok(adopted) => adopted,
                Err(EngineError::Transient(e)) => {
                    tracing::debug!(error = %e, "parent resolution failed");
                    false
                }
                Err(e) => return Err(e),
            };
            if !parent_adopted {
                self.store.apply_orphan(&block).map_err(fatal)?;
                tracing::info!(hash = %hex::encode(req.hash), "block orphaned");
                return Ok(false);
            }

            // Re-evaluate placement now that the parent landed.
            let tip = self
                .last_header()
                .ok_or_else(|| EngineError::Transient("tip vanished during adoption".into()))?;
            if prev == tip.hash() {
                self.extend_main(&block).await
            } else if self.store.header(Section::Main, &prev)?.is_some()
                || self.store.header(Section::Side, &prev)?.is_some()
            {
                self.extend_side(&block).await
            } else {
                Err(EngineError::Transient(
                    "parent adopted but not placed".into(),
                ))
            }
        })
    }

    // ── Main-chain extension ──

    async fn extend_main(&self, block: &Block) -> Result<bool, EngineError> {
        if !self.post_valid(block, &ForkContext::empty()).await? {
            return Ok(false);
        }
        self.store.apply_connect(block).map_err(fatal)?;
        self.store.remove_orphan(&block.hash()).map_err(fatal)?;
        self.store.set_last_header(&block.header).map_err(fatal)?;
        *self.last_header.lock().expect("tip lock") = Some(block.header);
        self.notify(WalletEvent::Connected(block.clone()));
        tracing::info!(
            seq = block.header.seq_num,
            hash = %hex::encode(block.hash()),
            "main chain extended"
        );
        Ok(true)
    }

    // ── Side-chain extension and reorganization ──

    async fn extend_side(&self, block: &Block) -> Result<bool, EngineError> {
        let tip = self
            .last_header()
            .ok_or_else(|| EngineError::Transient("no tip for side extension".into()))?;

        let (main_path, side_path) = self.fork_paths(block, &tip)?;
        let ctx = self.fork_context(&main_path, &side_path)?;

        if !self.post_valid(block, &ctx).await? {
            return Ok(false);
        }

        let main_total = difficulty::chain_total_difficulty(&self.store, &tip.hash())?;
        let side_total = block
            .header
            .difficulty
            .saturating_add(difficulty::chain_total_difficulty(
                &self.store,
                &block.header.prev_hash,
            )?);

        if main_total >= side_total {
            self.store.apply_side(block).map_err(fatal)?;
            self.store.remove_orphan(&block.hash()).map_err(fatal)?;
            tracing::info!(
                seq = block.header.seq_num,
                hash = %hex::encode(block.hash()),
                "side chain extended"
            );
            return Ok(true);
        }

        self.reorg(block, &main_path, &side_path).await?;
        Ok(true)
    }

    /// Hashes on each side of the fork point, oldest first, excluding the
    /// fork point itself and the incoming block.
    fn fork_paths(
        &self,
        block: &Block,
        tip: &BlockHeader,
    ) -> Result<(Vec<Hash>, Vec<Hash>), EngineError> {
        // Side ancestry back to the first header found in main
        let mut side_path = Vec::new();
        let mut cursor = block.header.prev_hash;
        loop {
            if self.store.header(Section::Main, &cursor)?.is_some() {
                break;
            }
            let Some(header) = self.store.header(Section::Side, &cursor)? else {
                return Err(EngineError::Transient("broken side ancestry".into()));
            };
            side_path.push(cursor);
            cursor = header.prev_hash;
        }
        let fork_point = cursor;

        // Main segment from the tip down to the fork point
        let mut main_path = Vec::new();
        let mut cursor = tip.hash();
        while cursor != fork_point {
            let Some(header) = self.store.header(Section::Main, &cursor)? else {
                return Err(EngineError::Transient("broken main ancestry".into()));
            };
            main_path.push(cursor);
            cursor = header.prev_hash;
        }

        main_path.reverse();
        side_path.reverse();
        Ok((main_path, side_path))
    }

    fn fork_context(
        &self,
        main_path: &[Hash],
        side_path: &[Hash],
    ) -> Result<ForkContext, EngineError> {
        let mut ctx = ForkContext::empty();
        for hash in main_path {
            let Some(block) = self.store.block(Section::Main, hash)? else {
                return Err(EngineError::Fatal("main path block missing".into()));
            };
            for txn in block.txns.iter().filter(|t| !t.is_coinbase()) {
                ctx.main_preimages.insert(txn.preimage_hash());
            }
        }
        for hash in side_path {
            let Some(block) = self.store.block(Section::Side, hash)? else {
                return Err(EngineError::Fatal("side path block missing".into()));
            };
            for txn in &block.txns {
                if !txn.is_coinbase() {
                    ctx.side_preimages.insert(txn.preimage_hash());
                }
                for output in &txn.body.outputs {
                    ctx.side_outputs.insert(output.hash(), output.clone());
                }
            }
        }
        Ok(ctx)
    }

    /// Swap main and side along the fork. The incoming block joins the
    /// promoted segment; tip and derived indices move atomically (a write
    /// failure mid-swap is fatal by design).
    async fn reorg(
        &self,
        block: &Block,
        main_path: &[Hash],
        side_path: &[Hash],
    ) -> Result<(), EngineError> {
        let mut demoted = Vec::with_capacity(main_path.len());
        for hash in main_path {
            let Some(b) = self.store.block(Section::Main, hash)? else {
                return Err(EngineError::Fatal("main path block missing".into()));
            };
            demoted.push(b);
        }
        let mut promoted = Vec::with_capacity(side_path.len() + 1);
        for hash in side_path {
            let Some(b) = self.store.block(Section::Side, hash)? else {
                return Err(EngineError::Fatal("side path block missing".into()));
            };
            promoted.push(b);
        }
        promoted.push(block.clone());

        self.store.apply_reorg(&demoted, &promoted).map_err(fatal)?;
        self.store.remove_orphan(&block.hash()).map_err(fatal)?;
        self.store.set_last_header(&block.header).map_err(fatal)?;
        *self.last_header.lock().expect("tip lock") = Some(block.header);

        // Wallet hears the old branch unwind tip-first, then the new
        // branch connect oldest-first.
        for b in demoted.iter().rev() {
            self.notify(WalletEvent::Disconnected(b.clone()));
        }
        for b in &promoted {
            self.notify(WalletEvent::Connected(b.clone()));
        }
        tracing::info!(
            new_tip = %hex::encode(block.hash()),
            demoted = demoted.len(),
            promoted = promoted.len(),
            "chain reorganization"
        );
        Ok(())
    }

    // ── Full validation ──

    async fn post_valid(&self, block: &Block, ctx: &ForkContext) -> Result<bool, EngineError> {
        if !difficulty::valid_difficulty(&self.store, block) {
            tracing::debug!(seq = block.header.seq_num, "difficulty mismatch");
            return Ok(false);
        }
        for txn in block.txns.iter().filter(|t| !t.is_coinbase()) {
            if !self.verify_txn(txn, ctx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Verify a non-coinbase transaction: resolve its ring, check the key
    /// image against the spent set (under the fork context), and run the
    /// cryptographic checks.
    pub async fn verify_txn(&self, txn: &Txn, ctx: &ForkContext) -> Result<bool, EngineError> {
        let mut ring_pks: Vec<CurvePoint> = Vec::with_capacity(txn.body.inputs.len());
        let mut ring_commits: Vec<CurvePoint> = Vec::with_capacity(txn.body.inputs.len());
        for input in &txn.body.inputs {
            let output = match self.resolve_output(input, ctx).await? {
                Some(output) => output,
                None => {
                    tracing::debug!(input = %hex::encode(input), "ring member unresolvable");
                    return Ok(false);
                }
            };
            ring_pks.push(output.dest_key);
            ring_commits.push(output.commit.point);
        }

        let pimg = txn.preimage_hash();
        let spent_on_main = self.store.has_preimage(&pimg)? && !ctx.main_preimages.contains(&pimg);
        if spent_on_main || ctx.side_preimages.contains(&pimg) {
            tracing::debug!(preimage = %hex::encode(pimg), "double spend rejected");
            return Ok(false);
        }

        Ok(txn.verify_crypto(&ring_pks, &ring_commits))
    }

    async fn resolve_output(
        &self,
        hash: &Hash,
        ctx: &ForkContext,
    ) -> Result<Option<Output>, EngineError> {
        if let Some(output) = self.store.output(hash)? {
            return Ok(Some(output));
        }
        if let Some(output) = ctx.side_outputs.get(hash) {
            return Ok(Some(output.clone()));
        }
        if let Some(peers) = &self.peers {
            return Ok(peers.find_output(hash).await);
        }
        Ok(None)
    }

    // ── Transaction pool admission ──

    /// Admit a gossiped or locally submitted transaction into the pool:
    /// shape, unseen key image (pool and chain), and full verification.
    pub async fn admit_txn(&self, txn: &Txn) -> Result<bool, EngineError> {
        if txn.is_coinbase() || !txn.validate_shape() {
            return Ok(false);
        }
        let pimg = txn.preimage_hash();
        if self.store.has_preimage(&pimg)? {
            tracing::debug!("txn key image already spent");
            return Ok(false);
        }
        if self.store.pool_txn(&pimg)?.is_some() {
            tracing::debug!("txn key image already pooled");
            return Ok(false);
        }
        if !self.verify_txn(txn, &ForkContext::empty()).await? {
            return Ok(false);
        }
        self.store.put_pool_txn(txn).map_err(fatal)?;
        Ok(true)
    }

    fn notify(&self, event: WalletEvent) {
        if let Some(tx) = &self.wallet_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;

    fn engine() -> Engine {
        let store = Arc::new(ChainStore::open_temporary().unwrap());
        Engine::new(store, None, None).unwrap()
    }

    fn request(engine: &Engine, block: Block) -> HashRequest {
        let hash = engine.offer_block(block);
        HashRequest {
            sender: String::new(),
            hash,
        }
    }

    #[tokio::test]
    async fn genesis_is_adopted() {
        let engine = engine();
        let key = PrivateKey::generate();
        let genesis = Block::genesis(&key.address());
        let req = request(&engine, genesis.clone());
        assert!(engine.add_or_orphan(req).await.unwrap());
        assert_eq!(engine.last_header().unwrap().hash(), genesis.hash());
    }

    #[tokio::test]
    async fn competing_genesis_rejected() {
        let engine = engine();
        let key = PrivateKey::generate();
        let genesis = Block::genesis(&key.address());
        let req = request(&engine, genesis.clone());
        assert!(engine.add_or_orphan(req).await.unwrap());

        let other = Block::genesis(&PrivateKey::generate().address());
        let req = request(&engine, other);
        assert!(!engine.add_or_orphan(req).await.unwrap());
        assert_eq!(engine.last_header().unwrap().hash(), genesis.hash());
    }

    #[tokio::test]
    async fn nonzero_seq_with_zero_parent_rejected() {
        let engine = engine();
        let key = PrivateKey::generate();
        let genesis = Block::genesis(&key.address());
        let req = request(&engine, genesis);
        assert!(engine.add_or_orphan(req).await.unwrap());

        // Claims genesis parentage at height 3
        let mut impostor = Block::genesis(&key.address());
        impostor.header.seq_num = 3;
        impostor.header.merkle_root = impostor.merkle_root();
        impostor.mine();
        let req = request(&engine, impostor);
        assert!(!engine.add_or_orphan(req).await.unwrap());
    }

    #[tokio::test]
    async fn stale_header_rejected() {
        let engine = engine();
        let key = PrivateKey::generate();
        let mut genesis = Block::genesis(&key.address());
        genesis.header.time = 1_000; // far past
        genesis.mine();
        let req = request(&engine, genesis);
        assert!(!engine.add_or_orphan(req).await.unwrap());
    }
}
