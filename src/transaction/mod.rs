//! Transactions: stealth outputs, ring-signed bodies, and coinbase.
//!
//! An output carries four points: the one-time transaction key `R`, the
//! stealth destination `D`, the blind seed `Q`, and the amount commitment
//! `C` with its embedded range proof. Inputs are referenced purely by
//! output hash; the signature ring hides which of the eight referenced
//! outputs is actually spent.
//!
//! Recipient-side decoding walks the same derivations in reverse: the
//! tracking secret recovers the shared secret behind `R` to claim `D`, and
//! the spend secret recovers the blinding seed behind `Q` to decrypt the
//! committed amount.

pub mod builder;

use serde::{Deserialize, Serialize};

use crate::constants::{self, TXN_NUM_INPUTS, TXN_NUM_OUTPUTS};
use crate::crypto::curve::{hash_to_scalar, scalar_from_hash, CurvePoint, CurveScalar};
use crate::crypto::keys::{PrivateKey, PublicAddress, TrackingKey};
use crate::crypto::ozrs::Ozrs;
use crate::crypto::range_proof::Commitment;
use crate::{canonical_hash, sha256, to_canonical_bytes, Hash, ZERO_HASH};

/// A spendable value holder: the UTXO of the system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Output {
    /// One-time transaction public key `R = [r]G`.
    pub txn_pk: CurvePoint,
    /// Stealth destination `D = [H([tsk]R)]G + spend_pk`.
    pub dest_key: CurvePoint,
    /// Blind seed `Q = [q]G`; empty for coinbase outputs.
    pub blind_seed: CurvePoint,
    /// Amount commitment with embedded range proof.
    pub commit: Commitment,
}

impl Output {
    /// Digest of the canonical encoding: how inputs reference this output.
    pub fn hash(&self) -> Hash {
        canonical_hash(self)
    }

    /// `H([tsk]R)`, the shared secret digest for this output.
    pub fn shared_secret_hash(&self, key: &TrackingKey) -> Hash {
        sha256(&self.txn_pk.mul(&key.track_sk).to_bytes())
    }

    /// Whether the stealth destination was derived for this tracking key.
    pub fn belongs_to(&self, key: &TrackingKey) -> bool {
        let h = scalar_from_hash(&self.shared_secret_hash(key));
        let derived = CurvePoint::base_mul(&h).add(&key.address.spend_pk);
        derived == self.dest_key
    }

    /// The one-time scalar able to spend this output:
    /// `H([tsk]R) + psk`, so that `[scalar]G == dest_key`.
    pub fn spend_scalar(&self, key: &PrivateKey) -> CurveScalar {
        scalar_from_hash(&self.shared_secret_hash(key.tracking())).add(&key.spend_sk)
    }

    /// Recover the commitment's blinding-schedule seed.
    ///
    /// Coinbase outputs carry an empty blind seed and commit with zero
    /// blinding; everything else derives `H([psk]Q)`.
    pub fn blinding_factor(&self, key: &PrivateKey) -> CurveScalar {
        if self.blind_seed.is_empty() {
            return CurveScalar::ZERO;
        }
        hash_to_scalar(&[&self.blind_seed.mul(&key.spend_sk).to_bytes()])
    }

    /// Decrypt the committed amount; `None` for someone else's output.
    pub fn decrypt_amount(&self, key: &PrivateKey) -> Option<u64> {
        self.commit.decrypt_amount(&self.blinding_factor(key))
    }

    /// Point-shape check. Coinbase outputs are allowed an empty blind seed.
    pub fn is_well_formed(&self, coinbase: bool) -> bool {
        !self.txn_pk.is_empty()
            && !self.dest_key.is_empty()
            && !self.commit.point.is_empty()
            && (coinbase || !self.blind_seed.is_empty())
    }
}

/// The signed portion of a transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxnBody {
    /// Hashes of the ring member outputs (exactly eight; one is spent).
    pub inputs: Vec<Hash>,
    /// New outputs (exactly two; coinbase carries one).
    pub outputs: Vec<Output>,
    /// Fee, committed as `[fee]H` in the balance equation.
    pub fee: u64,
}

/// A transaction: body plus the OZRS authorizing it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Txn {
    pub body: TxnBody,
    pub sig: Ozrs,
}

impl Txn {
    /// Digest of the body alone: the OZRS message.
    pub fn body_hash(&self) -> Hash {
        canonical_hash(&self.body)
    }

    /// Digest of the whole transaction: pool and gossip identifier.
    pub fn hash(&self) -> Hash {
        canonical_hash(self)
    }

    /// Coinbase transactions carry the single zero-hash input sentinel.
    pub fn is_coinbase(&self) -> bool {
        self.body.inputs.len() == 1 && self.body.inputs[0] == ZERO_HASH
    }

    /// Digest of the key image; the spent-output marker.
    pub fn preimage_hash(&self) -> Hash {
        self.sig.preimage_hash()
    }

    /// Structural validation: field counts, point shapes, size cap.
    /// Cheap and context-free; cryptographic checks live in
    /// [`Txn::verify_crypto`].
    pub fn validate_shape(&self) -> bool {
        let Ok(encoded) = to_canonical_bytes(self) else {
            return false;
        };
        if encoded.len() >= constants::MAX_TXN_BYTES {
            return false;
        }
        if self.is_coinbase() {
            return self.body.outputs.len() == 1
                && self.body.fee == 0
                && self.sig.preimage.is_empty()
                && self.body.outputs[0].is_well_formed(true);
        }
        self.body.inputs.len() == TXN_NUM_INPUTS
            && self.body.inputs.iter().all(|h| *h != ZERO_HASH)
            && self.body.outputs.len() == TXN_NUM_OUTPUTS
            && self.body.outputs.iter().all(|o| o.is_well_formed(false))
            && !self.sig.preimage.is_empty()
    }

    /// Cryptographic validation against the resolved ring: every output
    /// commitment verifies and the OZRS closes over the ring's destination
    /// keys and commitment points.
    pub fn verify_crypto(&self, ring_pks: &[CurvePoint], ring_commits: &[CurvePoint]) -> bool {
        if !self.body.outputs.iter().all(|o| o.commit.verify()) {
            return false;
        }
        let out_commits: Vec<CurvePoint> =
            self.body.outputs.iter().map(|o| o.commit.point).collect();
        self.sig.verify(
            &self.body_hash(),
            ring_pks,
            ring_commits,
            &out_commits,
            self.body.fee,
        )
    }

    /// Build the coinbase transaction for a block at `seq_num` collecting
    /// `fees`: one output paying `subsidy + fees` to `address` with zero
    /// blinding, so the commitment is exactly `[value]H` (publicly
    /// checkable), and an all-zero placeholder signature.
    pub fn new_coinbase(address: &PublicAddress, seq_num: u64, fees: u64) -> Txn {
        let value = constants::block_subsidy(seq_num) + fees;
        let r = CurveScalar::random();
        let txn_pk = CurvePoint::base_mul(&r);
        let shared = sha256(&address.track_pk.mul(&r).to_bytes());
        let dest_key =
            CurvePoint::base_mul(&scalar_from_hash(&shared)).add(&address.spend_pk);
        Txn {
            body: TxnBody {
                inputs: vec![ZERO_HASH],
                outputs: vec![Output {
                    txn_pk,
                    dest_key,
                    blind_seed: CurvePoint::EMPTY,
                    commit: Commitment::commit(value, &CurveScalar::ZERO),
                }],
                fee: 0,
            },
            sig: Ozrs::placeholder(),
        }
    }
}
