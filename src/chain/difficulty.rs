//! Difficulty retargeting and total-difficulty accounting.
//!
//! Every `DIFFICULTY_SPACING` blocks the difficulty adjusts toward a
//! two-week window, clamped to ±1 leading zero bit of the ancestor's
//! difficulty. Chain weight comparisons sum difficulties along parent
//! links, following headers through the main section and falling back to
//! the side section so candidate forks weigh their whole history.

use crate::chain::{Block, BlockHeader};
use crate::constants::{DIFFICULTY_SPACING, INITIAL_DIFFICULTY, TWO_WEEKS_SEC};
use crate::storage::{ChainStore, Section, StorageError};
use crate::Hash;

/// Look up a header in the main section, falling back to side.
fn header_main_or_side(
    store: &ChainStore,
    hash: &Hash,
) -> Result<Option<BlockHeader>, StorageError> {
    if let Some(header) = store.header(Section::Main, hash)? {
        return Ok(Some(header));
    }
    store.header(Section::Side, hash)
}

/// Walk `n` parent links back from `start`, through main and side headers.
pub fn nth_ancestor(
    store: &ChainStore,
    start: &Hash,
    n: u64,
) -> Result<Option<BlockHeader>, StorageError> {
    let mut hash = *start;
    let mut ancestor = None;
    for _ in 0..n {
        let Some(header) = header_main_or_side(store, &hash)? else {
            return Ok(None);
        };
        hash = header.prev_hash;
        ancestor = Some(header);
    }
    Ok(ancestor)
}

/// Sum of difficulties from `tip` back to genesis along parent links.
pub fn chain_total_difficulty(store: &ChainStore, tip: &Hash) -> Result<u64, StorageError> {
    let mut total = 0u64;
    let mut hash = *tip;
    while let Some(header) = header_main_or_side(store, &hash)? {
        total = total.saturating_add(header.difficulty);
        hash = header.prev_hash;
    }
    Ok(total)
}

/// The required difficulty for `block` under the retarget rule:
/// fixed until the first spacing boundary, then the ancestor's difficulty
/// scaled by target-time over actual-time, rounded, and clamped to ±1.
pub fn compute_difficulty(store: &ChainStore, block: &Block) -> Result<u64, StorageError> {
    if block.header.seq_num <= DIFFICULTY_SPACING {
        return Ok(INITIAL_DIFFICULTY);
    }
    let Some(anchor) = nth_ancestor(store, &block.header.prev_hash, DIFFICULTY_SPACING)? else {
        tracing::warn!(
            seq = block.header.seq_num,
            "retarget ancestor missing; forcing unattainable difficulty"
        );
        return Ok(1 << 63);
    };

    let old_target = anchor.difficulty;
    let lower = old_target.saturating_sub(1);
    let upper = old_target + 1;

    let actual = block.header.time as i64 - anchor.time as i64;
    if actual <= 0 {
        // Blocks came impossibly fast; push difficulty up
        return Ok(upper);
    }
    let scaled = (old_target as f64 * (TWO_WEEKS_SEC as f64 / actual as f64)).round() as u64;
    Ok(scaled.clamp(lower, upper))
}

/// `ValidDifficulty`: the block claims exactly what the rule demands.
pub fn valid_difficulty(store: &ChainStore, block: &Block) -> bool {
    match compute_difficulty(store, block) {
        Ok(required) => block.header.difficulty == required,
        Err(e) => {
            tracing::warn!(error = %e, "difficulty computation failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;
    use crate::transaction::Txn;
    use crate::ZERO_HASH;

    fn header(seq: u64, prev: Hash, time: u64, difficulty: u64) -> BlockHeader {
        BlockHeader {
            seq_num: seq,
            prev_hash: prev,
            merkle_root: ZERO_HASH,
            time,
            difficulty,
            nonce: 0,
        }
    }

    fn block_with_header(h: BlockHeader) -> Block {
        let key = PrivateKey::generate();
        Block {
            header: h,
            txns: vec![Txn::new_coinbase(&key.address(), h.seq_num, 0)],
        }
    }

    #[test]
    fn early_blocks_use_initial_difficulty() {
        let store = ChainStore::open_temporary().unwrap();
        let block = block_with_header(header(1, ZERO_HASH, 100, 0));
        assert_eq!(compute_difficulty(&store, &block).unwrap(), INITIAL_DIFFICULTY);
        let boundary = block_with_header(header(DIFFICULTY_SPACING, ZERO_HASH, 100, 0));
        assert_eq!(
            compute_difficulty(&store, &boundary).unwrap(),
            INITIAL_DIFFICULTY
        );
    }

    /// Store a synthetic chain of `len` headers starting at seq 0 with the
    /// given per-block timestamps; returns the tip hash and headers.
    fn store_chain(store: &ChainStore, len: u64, step_secs: u64, difficulty: u64) -> Vec<BlockHeader> {
        let mut headers = Vec::new();
        let mut prev = ZERO_HASH;
        for seq in 0..len {
            let h = header(seq, prev, 1_000_000 + seq * step_secs, difficulty);
            store.put_header(Section::Main, &h).unwrap();
            prev = h.hash();
            headers.push(h);
        }
        headers
    }

    #[test]
    fn retarget_clamps_to_plus_one_when_fast() {
        let store = ChainStore::open_temporary().unwrap();
        // 10-second blocks: far faster than the two-week window
        let headers = store_chain(&store, DIFFICULTY_SPACING + 1, 10, INITIAL_DIFFICULTY);
        let tip = headers.last().unwrap();
        let candidate = block_with_header(header(
            DIFFICULTY_SPACING + 1,
            tip.hash(),
            tip.time + 10,
            0,
        ));
        assert_eq!(
            compute_difficulty(&store, &candidate).unwrap(),
            INITIAL_DIFFICULTY + 1
        );
    }

    #[test]
    fn retarget_clamps_to_minus_one_when_slow() {
        let store = ChainStore::open_temporary().unwrap();
        // Year-long blocks: far slower than the window
        let headers = store_chain(
            &store,
            DIFFICULTY_SPACING + 1,
            365 * 24 * 3600,
            INITIAL_DIFFICULTY,
        );
        let tip = headers.last().unwrap();
        let candidate = block_with_header(header(
            DIFFICULTY_SPACING + 1,
            tip.hash(),
            tip.time + 365 * 24 * 3600,
            0,
        ));
        assert_eq!(
            compute_difficulty(&store, &candidate).unwrap(),
            INITIAL_DIFFICULTY - 1
        );
    }

    #[test]
    fn retarget_holds_on_target_pace() {
        let store = ChainStore::open_temporary().unwrap();
        // Exactly two weeks across the spacing window
        let step = TWO_WEEKS_SEC / DIFFICULTY_SPACING;
        let headers = store_chain(&store, DIFFICULTY_SPACING + 1, step, INITIAL_DIFFICULTY);
        let tip = headers.last().unwrap();
        let candidate = block_with_header(header(
            DIFFICULTY_SPACING + 1,
            tip.hash(),
            tip.time + step,
            0,
        ));
        assert_eq!(
            compute_difficulty(&store, &candidate).unwrap(),
            INITIAL_DIFFICULTY
        );
    }

    #[test]
    fn missing_ancestor_is_unattainable() {
        let store = ChainStore::open_temporary().unwrap();
        let candidate = block_with_header(header(DIFFICULTY_SPACING + 5, [9u8; 32], 100, 0));
        assert_eq!(compute_difficulty(&store, &candidate).unwrap(), 1 << 63);
        assert!(!valid_difficulty(&store, &candidate));
    }

    #[test]
    fn total_difficulty_sums_the_walk() {
        let store = ChainStore::open_temporary().unwrap();
        let headers = store_chain(&store, 5, 60, 3);
        let tip_hash = headers.last().unwrap().hash();
        assert_eq!(chain_total_difficulty(&store, &tip_hash).unwrap(), 15);
    }

    #[test]
    fn total_difficulty_crosses_into_side_section() {
        let store = ChainStore::open_temporary().unwrap();
        let headers = store_chain(&store, 3, 60, 2);
        // A side header hanging off the main tip
        let side = header(3, headers.last().unwrap().hash(), 2_000_000, 7);
        store.put_header(Section::Side, &side).unwrap();
        assert_eq!(chain_total_difficulty(&store, &side.hash()).unwrap(), 13);
    }
}
