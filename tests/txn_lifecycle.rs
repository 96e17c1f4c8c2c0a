//! Transaction-cryptography round trips across the public API: range
//! proofs, ring signatures, stealth output detection, and amount
//! decryption, exercised the way the node uses them together.

use obscura::constants;
use obscura::crypto::curve::{CurvePoint, CurveScalar};
use obscura::crypto::keys::PrivateKey;
use obscura::crypto::ozrs::Ozrs;
use obscura::crypto::pedersen;
use obscura::crypto::range_proof::{Commitment, RangeProof};
use obscura::transaction::{builder, Txn};

// ── Helpers ─────────────────────────────────────────────────────────────

/// A ring of eight outputs where member `idx` holds `amount` for `owner`.
fn funded_ring(
    owner: &PrivateKey,
    amount: u64,
    idx: usize,
) -> (Vec<obscura::transaction::Output>, CurveScalar, CurveScalar) {
    let mut ring = Vec::new();
    let mut spend_sk = CurveScalar::ZERO;
    let mut y_in = CurveScalar::ZERO;
    for i in 0..constants::TXN_NUM_INPUTS {
        let recipient = if i == idx {
            owner.address()
        } else {
            PrivateKey::generate().address()
        };
        let (output, blind) = builder::build_output(if i == idx { amount } else { 12345 }, &recipient);
        if i == idx {
            spend_sk = output.spend_scalar(owner);
            y_in = blind;
        }
        ring.push(output);
    }
    (ring, spend_sk, y_in)
}

// ── Range proofs (round-trip 8) ─────────────────────────────────────────

#[test]
fn range_proofs_verify_across_the_domain() {
    // Edges and a mixed-bit value; the exhaustive grid lives with the unit
    // tests, these pin the public behavior.
    for amount in [0u64, 1, 0b1010_1010, 5_000_000_000, (1 << 34) - 1] {
        let blind = CurveScalar::random();
        let commitment = Commitment::commit(amount, &blind);
        assert!(commitment.verify(), "amount {amount}");
        assert_eq!(commitment.decrypt_amount(&blind), Some(amount));
    }
}

#[test]
fn range_proof_binds_to_its_commitments() {
    let blind = CurveScalar::random();
    let other = RangeProof::sign(99, &CurveScalar::random());
    let mut commitment = Commitment::commit(42, &blind);
    commitment.proof.bit_commitments = other.bit_commitments;
    assert!(!commitment.verify());
}

// ── OZRS (round-trip 9) ─────────────────────────────────────────────────

#[test]
fn ozrs_verifies_exactly_when_amounts_conserve() {
    let msg = obscura::sha256(b"balance law");
    for idx in [0, 5] {
        let mut pks = Vec::new();
        let mut ics = Vec::new();
        let mut sk = CurveScalar::ZERO;
        let mut y_in = CurveScalar::ZERO;
        for i in 0..constants::TXN_NUM_INPUTS {
            let secret = CurveScalar::random();
            let blind = CurveScalar::random();
            if i == idx {
                sk = secret;
                y_in = blind;
            }
            pks.push(CurvePoint::base_mul(&secret));
            ics.push(pedersen::commit_u64(&blind, 1_000));
        }
        let out_blind = CurveScalar::random();
        let outputs = vec![pedersen::commit_u64(&out_blind, 990)];

        let good = Ozrs::sign(&msg, &pks, &ics, &outputs, 10, &sk, &y_in, &out_blind, idx);
        assert!(good.verify(&msg, &pks, &ics, &outputs, 10));
        // Fee off by one breaks the balance
        assert!(!good.verify(&msg, &pks, &ics, &outputs, 11));
    }
}

// ── Output ownership and decryption (round-trip 10) ─────────────────────

#[test]
fn outputs_decode_only_for_their_recipient() {
    let recipient = PrivateKey::generate();
    let stranger = PrivateKey::generate();
    for amount in [0u64, 1, 7_777_777] {
        let (output, _) = builder::build_output(amount, &recipient.address());
        assert!(output.belongs_to(recipient.tracking()));
        assert!(!output.belongs_to(stranger.tracking()));
        assert_eq!(output.decrypt_amount(&recipient), Some(amount));
        assert_eq!(output.decrypt_amount(&stranger), None);
    }
}

#[test]
fn spend_scalar_controls_the_destination_key() {
    let recipient = PrivateKey::generate();
    let (output, _) = builder::build_output(5, &recipient.address());
    let sk = output.spend_scalar(&recipient);
    assert_eq!(CurvePoint::base_mul(&sk), output.dest_key);
}

// ── Coinbase equality (invariant 5) ─────────────────────────────────────

#[test]
fn coinbase_commits_to_subsidy_plus_fees_exactly() {
    let key = PrivateKey::generate();
    for (seq, fees) in [(0u64, 0u64), (0, 17), (21_000, 3), (42_000, 0)] {
        let txn = Txn::new_coinbase(&key.address(), seq, fees);
        let expected = constants::block_subsidy(seq) + fees;
        // commitment - value*H is the zero point: zero blinding, known value
        let diff = txn.body.outputs[0]
            .commit
            .point
            .sub(&pedersen::value_point(expected));
        assert!(diff.is_empty(), "seq {seq} fees {fees}");
        assert!(txn.body.outputs[0].commit.verify());
    }
}

// ── Full transaction assembly ───────────────────────────────────────────

#[test]
fn assembled_txn_survives_the_full_verification_path() {
    let owner = PrivateKey::generate();
    let payee = PrivateKey::generate();
    let (ring, spend_sk, y_in) = funded_ring(&owner, 1_000_000, 4);

    let txn = builder::build_txn(
        &ring,
        &spend_sk,
        &y_in,
        4,
        &[250_000, 749_990],
        &[payee.address(), owner.address()],
        10,
    )
    .unwrap();

    assert!(txn.validate_shape());
    assert!(!txn.is_coinbase());
    let pks: Vec<_> = ring.iter().map(|o| o.dest_key).collect();
    let ics: Vec<_> = ring.iter().map(|o| o.commit.point).collect();
    assert!(txn.verify_crypto(&pks, &ics));

    // The payee finds and decrypts exactly their output
    let mine: Vec<_> = txn
        .body
        .outputs
        .iter()
        .filter(|o| o.belongs_to(payee.tracking()))
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].decrypt_amount(&payee), Some(250_000));
}

#[test]
fn tampered_body_invalidates_the_signature() {
    let owner = PrivateKey::generate();
    let payee = PrivateKey::generate();
    let (ring, spend_sk, y_in) = funded_ring(&owner, 1_000, 0);

    let mut txn = builder::build_txn(
        &ring,
        &spend_sk,
        &y_in,
        0,
        &[500, 499],
        &[payee.address(), owner.address()],
        1,
    )
    .unwrap();

    // Raising the fee after signing breaks both the message and balance
    txn.body.fee = 0;
    let pks: Vec<_> = ring.iter().map(|o| o.dest_key).collect();
    let ics: Vec<_> = ring.iter().map(|o| o.commit.point).collect();
    assert!(!txn.verify_crypto(&pks, &ics));
}
