//! Wallet: recipient-side scanning, balance tracking, and spend assembly.
//!
//! The engine pushes connected/disconnected block events; the wallet scans
//! each output against its tracking keys, decrypts amounts for matches,
//! and watches key images to notice its own outputs being spent. A reorg
//! unwinds cleanly because disconnection removes exactly what the block's
//! connection added.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::sync::mpsc;

use crate::chain::Block;
use crate::constants::{TXN_NUM_INPUTS, TXN_NUM_OUTPUTS};
use crate::crypto::keys::{PrivateKey, PublicAddress};
use crate::crypto::ozrs;
use crate::storage::ChainStore;
use crate::transaction::{builder, Output, Txn};
use crate::Hash;

/// Chain notifications from the engine, ordered with the mutations that
/// produced them.
#[derive(Clone, Debug)]
pub enum WalletEvent {
    Connected(Block),
    Disconnected(Block),
}

/// An output the wallet can spend (or has spent).
#[derive(Clone, Debug)]
pub struct OwnedOutput {
    pub output: Output,
    pub amount: u64,
    /// Block that created it.
    pub block_hash: Hash,
    /// Index of the owning key in the wallet's key list.
    pub key_index: usize,
    /// Key-image digest this output would reveal when spent.
    pub preimage_hash: Hash,
    pub spent: bool,
}

/// Tracks owned outputs across the scanned chain.
pub struct Wallet {
    keys: Vec<PrivateKey>,
    owned: HashMap<Hash, OwnedOutput>,
}

impl Wallet {
    pub fn new(keys: Vec<PrivateKey>) -> Self {
        Wallet {
            keys,
            owned: HashMap::new(),
        }
    }

    pub fn primary_address(&self) -> Option<PublicAddress> {
        self.keys.first().map(|k| k.address())
    }

    /// Scan a connected block: claim outputs sent to us, mark our outputs
    /// spent when their key images appear.
    pub fn scan_block(&mut self, block: &Block) {
        let block_hash = block.hash();
        let spent: HashSet<Hash> = block
            .txns
            .iter()
            .filter(|t| !t.is_coinbase())
            .map(|t| t.preimage_hash())
            .collect();
        for owned in self.owned.values_mut() {
            if spent.contains(&owned.preimage_hash) {
                owned.spent = true;
            }
        }

        for txn in &block.txns {
            for output in &txn.body.outputs {
                for (key_index, key) in self.keys.iter().enumerate() {
                    if !output.belongs_to(key.tracking()) {
                        continue;
                    }
                    let Some(amount) = output.decrypt_amount(key) else {
                        tracing::warn!("owned output failed amount decryption");
                        continue;
                    };
                    let spend_sk = output.spend_scalar(key);
                    let image = ozrs::key_image(&output.dest_key, &spend_sk);
                    let preimage_hash = crate::sha256(&image.to_bytes());
                    tracing::info!(amount, "received output");
                    self.owned.insert(
                        output.hash(),
                        OwnedOutput {
                            output: output.clone(),
                            amount,
                            block_hash,
                            key_index,
                            preimage_hash,
                            spent: false,
                        },
                    );
                    break;
                }
            }
        }
    }

    /// Unwind a disconnected block: drop outputs it created, un-spend
    /// outputs its transactions had consumed.
    pub fn forget_block(&mut self, block: &Block) {
        let block_hash = block.hash();
        self.owned.retain(|_, owned| owned.block_hash != block_hash);

        let unspent: HashSet<Hash> = block
            .txns
            .iter()
            .filter(|t| !t.is_coinbase())
            .map(|t| t.preimage_hash())
            .collect();
        for owned in self.owned.values_mut() {
            if unspent.contains(&owned.preimage_hash) {
                owned.spent = false;
            }
        }
    }

    /// Sum of unspent owned amounts.
    pub fn balance(&self) -> u64 {
        self.owned
            .values()
            .filter(|o| !o.spent)
            .map(|o| o.amount)
            .sum()
    }

    /// Smallest unspent output covering `amount` (plus nothing for fees;
    /// the caller includes the fee in `amount`).
    pub fn find_funding(&self, amount: u64) -> Option<&OwnedOutput> {
        self.owned
            .values()
            .filter(|o| !o.spent && o.amount >= amount)
            .min_by_key(|o| o.amount)
    }

    /// Build a payment of `amount` to `recipient` with change back to the
    /// funding key, hiding the spend in a ring of decoys sampled from the
    /// output universe.
    pub fn create_txn(
        &self,
        store: &ChainStore,
        recipient: &PublicAddress,
        amount: u64,
        fee: u64,
    ) -> Option<Txn> {
        let funding = self.find_funding(amount.checked_add(fee)?)?;
        let key = &self.keys[funding.key_index];
        let change = funding.amount - amount - fee;

        // Decoys: anything in the universe except the real spend. Tiny
        // universes cycle; a ring with repeats is valid, just less private.
        let funding_hash = funding.output.hash();
        let candidates: Vec<Output> = store
            .random_outputs(TXN_NUM_INPUTS * 2)
            .ok()?
            .into_iter()
            .filter(|o| o.hash() != funding_hash)
            .collect();

        let idx = rand::thread_rng().gen_range(0..TXN_NUM_INPUTS);
        let mut ring = Vec::with_capacity(TXN_NUM_INPUTS);
        let mut cursor = 0usize;
        for position in 0..TXN_NUM_INPUTS {
            if position == idx {
                ring.push(funding.output.clone());
            } else if candidates.is_empty() {
                ring.push(funding.output.clone());
            } else {
                ring.push(candidates[cursor % candidates.len()].clone());
                cursor += 1;
            }
        }

        let spend_sk = funding.output.spend_scalar(key);
        let y_in = funding.output.blinding_factor(key);
        let amounts = [amount, change];
        let recipients = [*recipient, key.address()];
        debug_assert_eq!(amounts.len(), TXN_NUM_OUTPUTS);
        builder::build_txn(&ring, &spend_sk, &y_in, idx, &amounts, &recipients, fee)
    }
}

/// Drive a shared wallet from the engine's event stream.
pub async fn run_wallet(
    wallet: Arc<Mutex<Wallet>>,
    mut events: mpsc::UnboundedReceiver<WalletEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut wallet = wallet.lock().expect("wallet lock");
        match event {
            WalletEvent::Connected(block) => wallet.scan_block(&block),
            WalletEvent::Disconnected(block) => wallet.forget_block(&block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_claims_coinbase() {
        let key = PrivateKey::generate();
        let mut wallet = Wallet::new(vec![key.clone()]);
        let block = Block::genesis(&key.address());
        wallet.scan_block(&block);
        assert_eq!(wallet.balance(), crate::constants::block_subsidy(0));
    }

    #[test]
    fn scan_ignores_foreign_outputs() {
        let mut wallet = Wallet::new(vec![PrivateKey::generate()]);
        let block = Block::genesis(&PrivateKey::generate().address());
        wallet.scan_block(&block);
        assert_eq!(wallet.balance(), 0);
    }

    #[test]
    fn forget_block_reverses_scan() {
        let key = PrivateKey::generate();
        let mut wallet = Wallet::new(vec![key.clone()]);
        let block = Block::genesis(&key.address());
        wallet.scan_block(&block);
        assert!(wallet.balance() > 0);
        wallet.forget_block(&block);
        assert_eq!(wallet.balance(), 0);
    }

    #[test]
    fn find_funding_prefers_tight_fit() {
        let key = PrivateKey::generate();
        let mut wallet = Wallet::new(vec![key.clone()]);
        let b0 = Block::genesis(&key.address());
        wallet.scan_block(&b0);
        let subsidy = crate::constants::block_subsidy(0);
        let funding = wallet.find_funding(1).unwrap();
        assert_eq!(funding.amount, subsidy);
        assert!(wallet.find_funding(subsidy + 1).is_none());
    }
}
