//! Persistent chain state over sled.
//!
//! Ten trees back the protocol's namespaces: three header sections
//! (main/side/orphan), three mirroring block sections, the spent key-image
//! set, the output-to-block map, the pending transaction pool (keyed by
//! key-image hash so conflicting spends collide), and the peer book. A
//! `meta` tree persists the main-chain tip across restarts.
//!
//! Grouped writes (block connect, reorg) build one `sled::Batch` per tree
//! and apply them in a fixed order; a failure partway is unrecoverable
//! corruption and is surfaced for the node to abort on rather than patched
//! around.

use serde::{de::DeserializeOwned, Serialize};

use crate::chain::{Block, BlockHeader};
use crate::transaction::{Output, Txn};
use crate::{from_canonical_bytes, to_canonical_bytes, Hash};

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Codec(String),
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Which chain partition a header or block currently lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Main,
    Side,
    Orphan,
}

/// Typed wrapper over the sled database.
pub struct ChainStore {
    #[allow(dead_code)]
    db: sled::Db,
    main_headers: sled::Tree,
    side_headers: sled::Tree,
    orphan_headers: sled::Tree,
    main_blocks: sled::Tree,
    side_blocks: sled::Tree,
    orphan_blocks: sled::Tree,
    preimages: sled::Tree,
    out_map: sled::Tree,
    txn_pool: sled::Tree,
    peers: sled::Tree,
    meta: sled::Tree,
}

const LAST_HEADER_KEY: &[u8] = b"last_header";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    to_canonical_bytes(value).map_err(|e| StorageError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    from_canonical_bytes(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}

impl ChainStore {
    /// Open or create the database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// An in-memory store for tests.
    pub fn open_temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(ChainStore {
            main_headers: db.open_tree("main_headers")?,
            side_headers: db.open_tree("side_headers")?,
            orphan_headers: db.open_tree("orphan_headers")?,
            main_blocks: db.open_tree("main_blocks")?,
            side_blocks: db.open_tree("side_blocks")?,
            orphan_blocks: db.open_tree("orphan_blocks")?,
            preimages: db.open_tree("preimages")?,
            out_map: db.open_tree("out_map")?,
            txn_pool: db.open_tree("txn_pool")?,
            peers: db.open_tree("peers")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    fn header_tree(&self, section: Section) -> &sled::Tree {
        match section {
            Section::Main => &self.main_headers,
            Section::Side => &self.side_headers,
            Section::Orphan => &self.orphan_headers,
        }
    }

    fn block_tree(&self, section: Section) -> &sled::Tree {
        match section {
            Section::Main => &self.main_blocks,
            Section::Side => &self.side_blocks,
            Section::Orphan => &self.orphan_blocks,
        }
    }

    // ── Headers ──

    pub fn put_header(&self, section: Section, header: &BlockHeader) -> Result<(), StorageError> {
        self.header_tree(section)
            .insert(header.hash(), encode(header)?)?;
        Ok(())
    }

    pub fn header(&self, section: Section, hash: &Hash) -> Result<Option<BlockHeader>, StorageError> {
        match self.header_tree(section).get(hash)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up a header across all three sections.
    pub fn lookup_header(&self, hash: &Hash) -> Result<Option<(Section, BlockHeader)>, StorageError> {
        for section in [Section::Main, Section::Side, Section::Orphan] {
            if let Some(header) = self.header(section, hash)? {
                return Ok(Some((section, header)));
            }
        }
        Ok(None)
    }

    // ── Blocks ──

    pub fn put_block(&self, section: Section, block: &Block) -> Result<(), StorageError> {
        self.block_tree(section)
            .insert(block.hash(), encode(block)?)?;
        Ok(())
    }

    pub fn block(&self, section: Section, hash: &Hash) -> Result<Option<Block>, StorageError> {
        match self.block_tree(section).get(hash)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up a block across all three sections.
    pub fn lookup_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        for section in [Section::Main, Section::Side, Section::Orphan] {
            if let Some(block) = self.block(section, hash)? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    // ── Preimages (spent key images) ──

    pub fn has_preimage(&self, hash: &Hash) -> Result<bool, StorageError> {
        Ok(self.preimages.contains_key(hash)?)
    }

    // ── Output/preimage → containing block ──

    pub fn block_of(&self, hash: &Hash) -> Result<Option<Hash>, StorageError> {
        match self.out_map.get(hash)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(Some(out))
            }
            Some(_) => Err(StorageError::Codec("malformed out_map entry".into())),
            None => Ok(None),
        }
    }

    /// Resolve an output by hash through the out_map.
    pub fn output(&self, hash: &Hash) -> Result<Option<Output>, StorageError> {
        let Some(block_hash) = self.block_of(hash)? else {
            return Ok(None);
        };
        let Some(block) = self.lookup_block(&block_hash)? else {
            return Ok(None);
        };
        for txn in &block.txns {
            for output in &txn.body.outputs {
                if output.hash() == *hash {
                    return Ok(Some(output.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Resolve a transaction by hash: pool first, then its enclosing block.
    pub fn txn(&self, hash: &Hash) -> Result<Option<Txn>, StorageError> {
        for entry in self.txn_pool.iter() {
            let (_, bytes) = entry?;
            let txn: Txn = decode(&bytes)?;
            if txn.hash() == *hash {
                return Ok(Some(txn));
            }
        }
        let Some(block_hash) = self.block_of(hash)? else {
            return Ok(None);
        };
        let Some(block) = self.lookup_block(&block_hash)? else {
            return Ok(None);
        };
        Ok(block.txns.iter().find(|t| t.hash() == *hash).cloned())
    }

    /// Sample up to `count` distinct outputs from the output universe
    /// (decoy selection for new rings).
    pub fn random_outputs(&self, count: usize) -> Result<Vec<Output>, StorageError> {
        use rand::seq::SliceRandom;
        let mut keys: Vec<Hash> = Vec::new();
        for entry in self.out_map.iter() {
            let (key, _) = entry?;
            if key.len() == 32 {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&key);
                keys.push(hash);
            }
        }
        keys.shuffle(&mut rand::thread_rng());
        let mut outputs = Vec::with_capacity(count);
        for key in keys {
            // out_map also indexes preimages; those resolve to no output
            if let Some(output) = self.output(&key)? {
                outputs.push(output);
                if outputs.len() == count {
                    break;
                }
            }
        }
        Ok(outputs)
    }

    // ── Transaction pool ──

    pub fn pool_txn(&self, preimage_hash: &Hash) -> Result<Option<Txn>, StorageError> {
        match self.txn_pool.get(preimage_hash)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_pool_txn(&self, txn: &Txn) -> Result<(), StorageError> {
        self.txn_pool.insert(txn.preimage_hash(), encode(txn)?)?;
        Ok(())
    }

    pub fn delete_pool_txn(&self, preimage_hash: &Hash) -> Result<(), StorageError> {
        self.txn_pool.remove(preimage_hash)?;
        Ok(())
    }

    /// All pool transactions; undecodable entries are skipped with a log
    /// line rather than poisoning the whole drain.
    pub fn pool_txns(&self) -> Result<Vec<Txn>, StorageError> {
        let mut txns = Vec::new();
        for entry in self.txn_pool.iter() {
            let (key, bytes) = entry?;
            match decode::<Txn>(&bytes) {
                Ok(txn) => txns.push(txn),
                Err(e) => {
                    tracing::warn!(key = %hex::encode(&key), error = %e, "skipping undecodable pool txn");
                }
            }
        }
        Ok(txns)
    }

    // ── Peers ──

    pub fn add_peer(&self, address: &str) -> Result<(), StorageError> {
        self.peers.insert(address.as_bytes(), Vec::<u8>::new())?;
        Ok(())
    }

    pub fn remove_peer(&self, address: &str) -> Result<(), StorageError> {
        self.peers.remove(address.as_bytes())?;
        Ok(())
    }

    pub fn peers(&self) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        for entry in self.peers.iter() {
            let (key, _) = entry?;
            if let Ok(address) = std::str::from_utf8(&key) {
                out.push(address.to_string());
            }
        }
        Ok(out)
    }

    // ── Main-chain tip ──

    pub fn last_header(&self) -> Result<Option<BlockHeader>, StorageError> {
        match self.meta.get(LAST_HEADER_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_last_header(&self, header: &BlockHeader) -> Result<(), StorageError> {
        self.meta.insert(LAST_HEADER_KEY, encode(header)?)?;
        Ok(())
    }

    // ── Grouped writes ──

    /// Connect a block to the main chain: header and block into the main
    /// sections, key images into the spent set and out of the pool, and
    /// out_map entries for every output and key image. One batch per tree,
    /// applied in a fixed order.
    pub fn apply_connect(&self, block: &Block) -> Result<(), StorageError> {
        let block_hash = block.hash();

        self.main_headers
            .insert(block_hash, encode(&block.header)?)?;
        self.main_blocks.insert(block_hash, encode(block)?)?;

        let mut preimage_batch = sled::Batch::default();
        let mut pool_batch = sled::Batch::default();
        let mut map_batch = sled::Batch::default();
        for txn in &block.txns {
            if !txn.is_coinbase() {
                let pimg = txn.preimage_hash();
                preimage_batch.insert(pimg.to_vec(), pimg.to_vec());
                pool_batch.remove(pimg.to_vec());
                map_batch.insert(pimg.to_vec(), block_hash.to_vec());
            }
            for output in &txn.body.outputs {
                map_batch.insert(output.hash().to_vec(), block_hash.to_vec());
            }
        }
        self.preimages.apply_batch(preimage_batch)?;
        self.txn_pool.apply_batch(pool_batch)?;
        self.out_map.apply_batch(map_batch)?;
        Ok(())
    }

    /// Record a block on a side chain (header and block sections only; no
    /// derived indices until it wins a reorg).
    pub fn apply_side(&self, block: &Block) -> Result<(), StorageError> {
        self.put_header(Section::Side, &block.header)?;
        self.put_block(Section::Side, block)
    }

    /// Record an orphan (unknown parent) block.
    pub fn apply_orphan(&self, block: &Block) -> Result<(), StorageError> {
        self.put_header(Section::Orphan, &block.header)?;
        self.put_block(Section::Orphan, block)
    }

    /// Swap main and side along a fork: `demoted` leaves the main chain,
    /// `promoted` joins it. Five batch groups in the order headers, blocks,
    /// preimages, pool, out_map. Within each group, deletions precede
    /// insertions so blocks present on both paths survive.
    pub fn apply_reorg(&self, demoted: &[Block], promoted: &[Block]) -> Result<(), StorageError> {
        // 1. Headers
        let mut main_hdr = sled::Batch::default();
        let mut side_hdr = sled::Batch::default();
        for block in demoted {
            main_hdr.remove(block.hash().to_vec());
            side_hdr.insert(block.hash().to_vec(), encode(&block.header)?);
        }
        for block in promoted {
            side_hdr.remove(block.hash().to_vec());
            main_hdr.insert(block.hash().to_vec(), encode(&block.header)?);
        }
        self.main_headers.apply_batch(main_hdr)?;
        self.side_headers.apply_batch(side_hdr)?;

        // 2. Blocks
        let mut main_blk = sled::Batch::default();
        let mut side_blk = sled::Batch::default();
        for block in demoted {
            main_blk.remove(block.hash().to_vec());
            side_blk.insert(block.hash().to_vec(), encode(block)?);
        }
        for block in promoted {
            side_blk.remove(block.hash().to_vec());
            main_blk.insert(block.hash().to_vec(), encode(block)?);
        }
        self.main_blocks.apply_batch(main_blk)?;
        self.side_blocks.apply_batch(side_blk)?;

        // 3. Preimages
        let mut pimg_batch = sled::Batch::default();
        for txn in demoted.iter().flat_map(|b| &b.txns).filter(|t| !t.is_coinbase()) {
            pimg_batch.remove(txn.preimage_hash().to_vec());
        }
        for txn in promoted.iter().flat_map(|b| &b.txns).filter(|t| !t.is_coinbase()) {
            let pimg = txn.preimage_hash();
            pimg_batch.insert(pimg.to_vec(), pimg.to_vec());
        }
        self.preimages.apply_batch(pimg_batch)?;

        // 4. Pool: demoted spends become pending again, promoted spends
        // leave the pool.
        let mut pool_batch = sled::Batch::default();
        for txn in demoted.iter().flat_map(|b| &b.txns).filter(|t| !t.is_coinbase()) {
            pool_batch.insert(txn.preimage_hash().to_vec(), encode(txn)?);
        }
        for txn in promoted.iter().flat_map(|b| &b.txns).filter(|t| !t.is_coinbase()) {
            pool_batch.remove(txn.preimage_hash().to_vec());
        }
        self.txn_pool.apply_batch(pool_batch)?;

        // 5. Out map
        let mut map_batch = sled::Batch::default();
        for block in demoted {
            for txn in &block.txns {
                if !txn.is_coinbase() {
                    map_batch.remove(txn.preimage_hash().to_vec());
                }
                for output in &txn.body.outputs {
                    map_batch.remove(output.hash().to_vec());
                }
            }
        }
        for block in promoted {
            let block_hash = block.hash();
            for txn in &block.txns {
                if !txn.is_coinbase() {
                    map_batch.insert(txn.preimage_hash().to_vec(), block_hash.to_vec());
                }
                for output in &txn.body.outputs {
                    map_batch.insert(output.hash().to_vec(), block_hash.to_vec());
                }
            }
        }
        self.out_map.apply_batch(map_batch)?;
        Ok(())
    }

    /// Move an orphan into the resolution path by deleting it from the
    /// orphan sections (the caller re-places it through normal adoption).
    pub fn remove_orphan(&self, hash: &Hash) -> Result<(), StorageError> {
        self.orphan_headers.remove(hash)?;
        self.orphan_blocks.remove(hash)?;
        Ok(())
    }

    /// Hashes of orphans whose parent is `parent` (promotion candidates).
    pub fn orphan_children(&self, parent: &Hash) -> Result<Vec<Hash>, StorageError> {
        let mut children = Vec::new();
        for entry in self.orphan_headers.iter() {
            let (key, bytes) = entry?;
            let header: BlockHeader = decode(&bytes)?;
            if header.prev_hash == *parent && key.len() == 32 {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&key);
                children.push(hash);
            }
        }
        Ok(children)
    }
}
