//! OZRS: the linkable ring signature authorizing spends.
//!
//! One signature over a ring of `k` candidate inputs simultaneously proves:
//! - knowledge of the destination-key scalar of exactly one ring member,
//!   without revealing which;
//! - that the signer's input commitment balances the transaction outputs
//!   plus fee (`C_idx - ΣC_out - [fee]H` is a pure blinding point whose
//!   scalar the signer knows);
//! - a key image `I = [sk]H_p(X_idx)` that is deterministic per spent
//!   output, so a second spend of the same output produces the same image
//!   and is rejected by the preimage index.
//!
//! Three Schnorr chains are interleaved per ring step: the commitment
//! difference chain is challenged with `e_i`, while the spend-key and
//! key-image chains use `H(e_i)` for domain separation.

use serde::{Deserialize, Serialize};

use super::curve::{
    close_ring, hash_to_point, response_point, response_point_base, CurvePoint, CurveScalar,
};
use super::pedersen;
use crate::constants::TXN_NUM_INPUTS;
use crate::{constant_time_eq, sha256, sha256_concat, Hash, ZERO_HASH};

/// A ring signature over `TXN_NUM_INPUTS` candidate inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ozrs {
    /// Key image `[sk]H_p(X_idx)`: the single-use spend tag.
    pub preimage: CurvePoint,
    /// Ring entry challenge.
    pub e0: Hash,
    /// Commitment-difference chain responses.
    pub r: Vec<CurveScalar>,
    /// Spend-key / key-image chain responses.
    pub s: Vec<CurveScalar>,
}

/// `H_p(pk)` scaled by the secret: the key image for a spendable output.
pub fn key_image(pk: &CurvePoint, sk: &CurveScalar) -> CurvePoint {
    hash_to_point(&pk.to_bytes()).mul(sk)
}

/// `C_i - (ΣC_out + [fee]H)` for every ring member.
///
/// At the signer's index this collapses to `[y_in - y_out]G` when amounts
/// conserve, which is exactly what the ring proves knowledge of.
fn commit_differences(
    input_commits: &[CurvePoint],
    output_commits: &[CurvePoint],
    fee: u64,
) -> Vec<CurvePoint> {
    let spent = output_commits
        .iter()
        .fold(pedersen::value_point(fee), |acc, c| acc.add(c));
    input_commits.iter().map(|c| c.sub(&spent)).collect()
}

/// One ring step: absorb member `i`'s responses into the next challenge.
fn chain_step(
    msg: &Hash,
    r: &CurveScalar,
    s: &CurveScalar,
    e1: &Hash,
    diff: &CurvePoint,
    pk: &CurvePoint,
    image: &CurvePoint,
) -> Hash {
    let e2 = sha256(e1);
    let image_base = hash_to_point(&pk.to_bytes());
    let r1 = response_point(r, e1, diff);
    let r2 = response_point(s, &e2, pk);
    let r3 = response_point_base(s, &image_base, &e2, image);
    sha256_concat(&[msg, &r1.to_bytes(), &r2.to_bytes(), &r3.to_bytes()])
}

impl Ozrs {
    /// All-zero placeholder carried by coinbase transactions.
    pub fn placeholder() -> Ozrs {
        Ozrs {
            preimage: CurvePoint::EMPTY,
            e0: ZERO_HASH,
            r: vec![CurveScalar::ZERO; TXN_NUM_INPUTS],
            s: vec![CurveScalar::ZERO; TXN_NUM_INPUTS],
        }
    }

    /// Sign `msg` over the ring.
    ///
    /// `pks` / `input_commits` are the destination keys and commitment
    /// points of all ring members; `sk` is the spend scalar of member
    /// `idx`, `y_in` its commitment blinding, and `y_out` the sum of the
    /// output blindings.
    #[allow(clippy::too_many_arguments)]
    pub fn sign(
        msg: &Hash,
        pks: &[CurvePoint],
        input_commits: &[CurvePoint],
        output_commits: &[CurvePoint],
        fee: u64,
        sk: &CurveScalar,
        y_in: &CurveScalar,
        y_out: &CurveScalar,
        idx: usize,
    ) -> Ozrs {
        assert_eq!(pks.len(), TXN_NUM_INPUTS, "ring size");
        assert_eq!(input_commits.len(), TXN_NUM_INPUTS, "ring size");
        assert!(idx < TXN_NUM_INPUTS, "signer index in ring");

        let diffs = commit_differences(input_commits, output_commits, fee);
        let image = key_image(&pks[idx], sk);
        let image_base = hash_to_point(&pks[idx].to_bytes());

        let mut es = vec![ZERO_HASH; TXN_NUM_INPUTS];
        let mut r = vec![CurveScalar::ZERO; TXN_NUM_INPUTS];
        let mut s = vec![CurveScalar::ZERO; TXN_NUM_INPUTS];

        // Honest nonce commitments seed the challenge after the signer.
        let k1 = CurveScalar::random();
        let k2 = CurveScalar::random();
        es[(idx + 1) % TXN_NUM_INPUTS] = sha256_concat(&[
            msg,
            &CurvePoint::base_mul(&k1).to_bytes(),
            &CurvePoint::base_mul(&k2).to_bytes(),
            &image_base.mul(&k2).to_bytes(),
        ]);

        // Simulate every other member with random responses.
        let mut i = (idx + 1) % TXN_NUM_INPUTS;
        while i != idx {
            r[i] = CurveScalar::random();
            s[i] = CurveScalar::random();
            es[(i + 1) % TXN_NUM_INPUTS] =
                chain_step(msg, &r[i], &s[i], &es[i], &diffs[i], &pks[i], &image);
            i = (i + 1) % TXN_NUM_INPUTS;
        }

        // Close both chains at the signer.
        let e1 = es[idx];
        let e2 = sha256(&e1);
        let z = y_in.sub(y_out);
        r[idx] = close_ring(&z, &k1, &e1);
        s[idx] = close_ring(sk, &k2, &e2);

        Ozrs {
            preimage: image,
            e0: es[0],
            r,
            s,
        }
    }

    /// Recompute the ring forward from `e0`; accept iff it closes.
    pub fn verify(
        &self,
        msg: &Hash,
        pks: &[CurvePoint],
        input_commits: &[CurvePoint],
        output_commits: &[CurvePoint],
        fee: u64,
    ) -> bool {
        if pks.len() != TXN_NUM_INPUTS
            || input_commits.len() != TXN_NUM_INPUTS
            || self.r.len() != TXN_NUM_INPUTS
            || self.s.len() != TXN_NUM_INPUTS
        {
            return false;
        }
        if self.preimage.is_empty() {
            return false;
        }
        let diffs = commit_differences(input_commits, output_commits, fee);
        let mut e = self.e0;
        for i in 0..TXN_NUM_INPUTS {
            e = chain_step(msg, &self.r[i], &self.s[i], &e, &diffs[i], &pks[i], &self.preimage);
        }
        constant_time_eq(&self.e0, &e)
    }

    /// Digest of the key image: the key under which spends are indexed.
    pub fn preimage_hash(&self) -> Hash {
        sha256(&self.preimage.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TXN_NUM_INPUTS;

    /// A ring with the signer at `idx`: the signer's commitment blinds
    /// `in_amount`, the decoys are random points.
    fn test_ring(
        idx: usize,
        in_amount: u64,
    ) -> (Vec<CurvePoint>, Vec<CurvePoint>, CurveScalar, CurveScalar) {
        let mut pks = Vec::new();
        let mut commits = Vec::new();
        let mut sk = CurveScalar::ZERO;
        let mut y_in = CurveScalar::ZERO;
        for i in 0..TXN_NUM_INPUTS {
            let secret = CurveScalar::random();
            let blind = CurveScalar::random();
            if i == idx {
                sk = secret;
                y_in = blind;
            }
            pks.push(CurvePoint::base_mul(&secret));
            commits.push(pedersen::commit_u64(&blind, in_amount));
        }
        (pks, commits, sk, y_in)
    }

    /// Output commitments summing with fee to `in_amount`.
    fn test_outputs(amounts: &[u64]) -> (Vec<CurvePoint>, CurveScalar) {
        let mut commits = Vec::new();
        let mut y_out = CurveScalar::ZERO;
        for &amount in amounts {
            let blind = CurveScalar::random();
            y_out = y_out.add(&blind);
            commits.push(pedersen::commit_u64(&blind, amount));
        }
        (commits, y_out)
    }

    #[test]
    fn sign_verify_roundtrip() {
        let msg = sha256(b"txn body");
        let (pks, ics, sk, y_in) = test_ring(0, 5_000_000_000);
        let (ocs, y_out) = test_outputs(&[1, 4_999_999_998]);
        let sig = Ozrs::sign(&msg, &pks, &ics, &ocs, 1, &sk, &y_in, &y_out, 0);
        assert!(sig.verify(&msg, &pks, &ics, &ocs, 1));
    }

    #[test]
    fn every_signer_index_verifies() {
        let msg = sha256(b"index sweep");
        for idx in [1, 4, TXN_NUM_INPUTS - 1] {
            let (pks, ics, sk, y_in) = test_ring(idx, 100);
            let (ocs, y_out) = test_outputs(&[60, 39]);
            let sig = Ozrs::sign(&msg, &pks, &ics, &ocs, 1, &sk, &y_in, &y_out, idx);
            assert!(sig.verify(&msg, &pks, &ics, &ocs, 1), "idx {idx}");
        }
    }

    #[test]
    fn wrong_message_fails() {
        let msg = sha256(b"signed");
        let (pks, ics, sk, y_in) = test_ring(2, 50);
        let (ocs, y_out) = test_outputs(&[49]);
        let sig = Ozrs::sign(&msg, &pks, &ics, &ocs, 1, &sk, &y_in, &y_out, 2);
        assert!(!sig.verify(&sha256(b"altered"), &pks, &ics, &ocs, 1));
    }

    #[test]
    fn unbalanced_amounts_fail() {
        // Outputs + fee exceed the input: the commitment difference at the
        // signer is no longer a pure blinding point.
        let msg = sha256(b"unbalanced");
        let (pks, ics, sk, y_in) = test_ring(0, 50);
        let (ocs, y_out) = test_outputs(&[50]);
        let sig = Ozrs::sign(&msg, &pks, &ics, &ocs, 1, &sk, &y_in, &y_out, 0);
        assert!(!sig.verify(&msg, &pks, &ics, &ocs, 1));
    }

    #[test]
    fn tampered_response_fails() {
        let msg = sha256(b"tamper");
        let (pks, ics, sk, y_in) = test_ring(3, 10);
        let (ocs, y_out) = test_outputs(&[9]);
        let mut sig = Ozrs::sign(&msg, &pks, &ics, &ocs, 1, &sk, &y_in, &y_out, 3);
        sig.s[5] = CurveScalar::random();
        assert!(!sig.verify(&msg, &pks, &ics, &ocs, 1));
    }

    #[test]
    fn swapped_preimage_fails() {
        let msg = sha256(b"image swap");
        let (pks, ics, sk, y_in) = test_ring(0, 10);
        let (ocs, y_out) = test_outputs(&[9]);
        let mut sig = Ozrs::sign(&msg, &pks, &ics, &ocs, 1, &sk, &y_in, &y_out, 0);
        sig.preimage = key_image(&pks[1], &CurveScalar::random());
        assert!(!sig.verify(&msg, &pks, &ics, &ocs, 1));
    }

    #[test]
    fn key_image_is_deterministic_per_output() {
        // Two spends of the same output key yield the same image: the
        // double-spend detector.
        let sk = CurveScalar::random();
        let pk = CurvePoint::base_mul(&sk);
        assert_eq!(key_image(&pk, &sk), key_image(&pk, &sk));
        let other = CurveScalar::random();
        assert_ne!(key_image(&pk, &sk), key_image(&CurvePoint::base_mul(&other), &other));
    }

    #[test]
    fn placeholder_never_verifies() {
        let msg = sha256(b"coinbase");
        let (pks, ics, ..) = test_ring(0, 1);
        let (ocs, _) = test_outputs(&[1]);
        assert!(!Ozrs::placeholder().verify(&msg, &pks, &ics, &ocs, 0));
    }
}
