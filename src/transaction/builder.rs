//! Transaction assembly: stealth output construction and ring signing.
//!
//! The builder takes already-resolved ring members (the caller samples
//! decoys from the output universe) and the spend secrets for exactly one
//! of them, derives fresh one-time keys and blinding seeds for each
//! recipient, and closes the OZRS over the whole body.

use crate::constants::{TXN_NUM_INPUTS, TXN_NUM_OUTPUTS};
use crate::crypto::curve::{hash_to_scalar, scalar_from_hash, CurvePoint, CurveScalar};
use crate::crypto::keys::PublicAddress;
use crate::crypto::ozrs::Ozrs;
use crate::crypto::range_proof::Commitment;
use crate::sha256;

use super::{Output, Txn, TxnBody};

/// Build one stealth output paying `amount` to `recipient`.
///
/// Returns the output and its blinding-schedule seed `H([q]spend_pk)`,
/// which the recipient independently recovers as `H([psk]Q)`.
pub fn build_output(amount: u64, recipient: &PublicAddress) -> (Output, CurveScalar) {
    // One-time transaction key and stealth destination
    let r = CurveScalar::random();
    let txn_pk = CurvePoint::base_mul(&r);
    let shared = sha256(&recipient.track_pk.mul(&r).to_bytes());
    let dest_key = CurvePoint::base_mul(&scalar_from_hash(&shared)).add(&recipient.spend_pk);

    // Blind seed and derived blinding factor
    let q = CurveScalar::random();
    let blind_seed = CurvePoint::base_mul(&q);
    let blind = hash_to_scalar(&[&recipient.spend_pk.mul(&q).to_bytes()]);

    let output = Output {
        txn_pk,
        dest_key,
        blind_seed,
        commit: Commitment::commit(amount, &blind),
    };
    (output, blind)
}

/// Build all outputs for a transaction, returning them with the summed
/// output blinding `y_out` needed to close the signature ring.
pub fn build_outputs(
    amounts: &[u64],
    recipients: &[PublicAddress],
) -> (Vec<Output>, CurveScalar) {
    debug_assert_eq!(amounts.len(), recipients.len());
    let mut outputs = Vec::with_capacity(amounts.len());
    let mut y_out = CurveScalar::ZERO;
    for (amount, recipient) in amounts.iter().zip(recipients) {
        let (output, blind) = build_output(*amount, recipient);
        y_out = y_out.add(&blind);
        outputs.push(output);
    }
    (outputs, y_out)
}

/// Assemble and sign a transaction.
///
/// `ring` holds the eight ring member outputs; `idx` selects the one being
/// spent, with `spend_sk` its one-time spend scalar and `y_in` its
/// commitment blinding. Returns `None` when the shapes don't line up.
pub fn build_txn(
    ring: &[Output],
    spend_sk: &CurveScalar,
    y_in: &CurveScalar,
    idx: usize,
    amounts: &[u64],
    recipients: &[PublicAddress],
    fee: u64,
) -> Option<Txn> {
    if ring.len() != TXN_NUM_INPUTS || idx >= TXN_NUM_INPUTS {
        return None;
    }
    if amounts.len() != TXN_NUM_OUTPUTS || recipients.len() != TXN_NUM_OUTPUTS {
        return None;
    }

    let ring_pks: Vec<CurvePoint> = ring.iter().map(|o| o.dest_key).collect();
    let ring_commits: Vec<CurvePoint> = ring.iter().map(|o| o.commit.point).collect();
    let input_hashes: Vec<_> = ring.iter().map(|o| o.hash()).collect();

    let (outputs, y_out) = build_outputs(amounts, recipients);
    let mut txn = Txn {
        body: TxnBody {
            inputs: input_hashes,
            outputs,
            fee,
        },
        sig: Ozrs::placeholder(),
    };
    let out_commits: Vec<CurvePoint> = txn.body.outputs.iter().map(|o| o.commit.point).collect();
    txn.sig = Ozrs::sign(
        &txn.body_hash(),
        &ring_pks,
        &ring_commits,
        &out_commits,
        fee,
        spend_sk,
        y_in,
        &y_out,
        idx,
    );
    Some(txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;

    /// A ring whose `idx` member is a real output owned by `owner` holding
    /// `amount`; the rest are decoys paying strangers.
    fn ring_with_owned(
        owner: &PrivateKey,
        amount: u64,
        idx: usize,
    ) -> (Vec<Output>, CurveScalar, CurveScalar) {
        let mut ring = Vec::new();
        let mut spend_sk = CurveScalar::ZERO;
        let mut y_in = CurveScalar::ZERO;
        for i in 0..TXN_NUM_INPUTS {
            if i == idx {
                let (output, blind) = build_output(amount, &owner.address());
                spend_sk = output.spend_scalar(owner);
                y_in = blind;
                ring.push(output);
            } else {
                let decoy = PrivateKey::generate();
                let (output, _) = build_output(999, &decoy.address());
                ring.push(output);
            }
        }
        (ring, spend_sk, y_in)
    }

    #[test]
    fn built_txn_verifies() {
        let owner = PrivateKey::generate();
        let alice = PrivateKey::generate();
        let (ring, spend_sk, y_in) = ring_with_owned(&owner, 100, 3);

        let txn = build_txn(
            &ring,
            &spend_sk,
            &y_in,
            3,
            &[60, 39],
            &[alice.address(), owner.address()],
            1,
        )
        .unwrap();

        assert!(txn.validate_shape());
        let pks: Vec<_> = ring.iter().map(|o| o.dest_key).collect();
        let ics: Vec<_> = ring.iter().map(|o| o.commit.point).collect();
        assert!(txn.verify_crypto(&pks, &ics));
    }

    #[test]
    fn recipient_detects_and_decrypts() {
        let owner = PrivateKey::generate();
        let alice = PrivateKey::generate();
        let (ring, spend_sk, y_in) = ring_with_owned(&owner, 100, 0);

        let txn = build_txn(
            &ring,
            &spend_sk,
            &y_in,
            0,
            &[42, 57],
            &[alice.address(), owner.address()],
            1,
        )
        .unwrap();

        let to_alice = &txn.body.outputs[0];
        assert!(to_alice.belongs_to(alice.tracking()));
        assert!(!to_alice.belongs_to(owner.tracking()));
        assert_eq!(to_alice.decrypt_amount(&alice), Some(42));

        let change = &txn.body.outputs[1];
        assert!(change.belongs_to(owner.tracking()));
        assert_eq!(change.decrypt_amount(&owner), Some(57));
    }

    #[test]
    fn unbalanced_txn_fails_verification() {
        // Outputs exceed the spent input: signature cannot balance.
        let owner = PrivateKey::generate();
        let alice = PrivateKey::generate();
        let (ring, spend_sk, y_in) = ring_with_owned(&owner, 100, 0);

        let txn = build_txn(
            &ring,
            &spend_sk,
            &y_in,
            0,
            &[100, 100],
            &[alice.address(), owner.address()],
            1,
        )
        .unwrap();

        let pks: Vec<_> = ring.iter().map(|o| o.dest_key).collect();
        let ics: Vec<_> = ring.iter().map(|o| o.commit.point).collect();
        assert!(!txn.verify_crypto(&pks, &ics));
    }

    #[test]
    fn bad_ring_size_rejected() {
        let owner = PrivateKey::generate();
        let (mut ring, spend_sk, y_in) = ring_with_owned(&owner, 100, 0);
        ring.pop();
        assert!(build_txn(
            &ring,
            &spend_sk,
            &y_in,
            0,
            &[50, 49],
            &[owner.address(), owner.address()],
            1,
        )
        .is_none());
    }

    #[test]
    fn same_spend_same_preimage() {
        // Spending the same output twice exposes the same key image.
        let owner = PrivateKey::generate();
        let alice = PrivateKey::generate();
        let (ring, spend_sk, y_in) = ring_with_owned(&owner, 100, 2);

        let recipients = [alice.address(), owner.address()];
        let t1 = build_txn(&ring, &spend_sk, &y_in, 2, &[60, 39], &recipients, 1).unwrap();
        let t2 = build_txn(&ring, &spend_sk, &y_in, 2, &[10, 89], &recipients, 1).unwrap();
        assert_eq!(t1.preimage_hash(), t2.preimage_hash());
        assert_ne!(t1.hash(), t2.hash());
    }
}
