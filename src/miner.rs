//! Thin mining driver.
//!
//! Rebuilds the block template whenever the tip moves, refreshes its
//! timestamp (and retargeted difficulty) periodically, and grinds the
//! nonce in batches so the task stays cooperative. Found blocks go to the
//! node's mined-block channel and flow through normal adoption. On an
//! empty chain the miner bootstraps by mining genesis.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::chain::block::unix_now;
use crate::chain::{difficulty, Block};
use crate::consensus::Engine;
use crate::constants::INITIAL_DIFFICULTY;
use crate::crypto::keys::PublicAddress;

/// Nonces ground between cooperative yields.
const NONCE_BATCH: u64 = 20_000;
/// Seconds between template timestamp refreshes.
const TEMPLATE_REFRESH_SEC: u64 = 30;

pub async fn run_miner(
    engine: Arc<Engine>,
    address: PublicAddress,
    mined_blocks: mpsc::Sender<Block>,
) {
    tracing::info!("miner running");
    loop {
        let Some(tip) = engine.last_header() else {
            tracing::info!("empty chain; mining genesis");
            let genesis = Block::genesis(&address);
            if mined_blocks.send(genesis).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
            continue;
        };

        let mut template = build_template(&engine, &address);
        let mut last_refresh = unix_now();

        loop {
            // Tip moved (our block or a peer's): start over
            match engine.last_header() {
                Some(current) if current.hash() == tip.hash() => {}
                _ => break,
            }

            if unix_now() - last_refresh >= TEMPLATE_REFRESH_SEC {
                template.header.time = unix_now();
                template.header.difficulty = difficulty::compute_difficulty(engine.store(), &template)
                    .unwrap_or(INITIAL_DIFFICULTY);
                last_refresh = unix_now();
            }

            let mut found = false;
            for _ in 0..NONCE_BATCH {
                if template.header.valid_pow() {
                    found = true;
                    break;
                }
                template.header.nonce = template.header.nonce.wrapping_add(1);
            }
            if found {
                tracing::info!(seq = template.header.seq_num, "block found");
                if mined_blocks.send(template.clone()).await.is_err() {
                    return;
                }
                // Wait for adoption to move the tip before rebuilding
                tokio::time::sleep(Duration::from_millis(100)).await;
                break;
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Assemble a template on the current tip from the verified pool.
fn build_template(engine: &Engine, address: &PublicAddress) -> Block {
    let tip = engine.last_header().expect("template needs a tip");
    let pool = engine.store().pool_txns().unwrap_or_default();
    let mut block = Block::build(&tip, pool, address, INITIAL_DIFFICULTY);
    block.header.difficulty =
        difficulty::compute_difficulty(engine.store(), &block).unwrap_or(INITIAL_DIFFICULTY);
    block
}
