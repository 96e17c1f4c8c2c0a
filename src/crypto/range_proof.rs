//! Bitwise ring-signature range proofs for committed amounts.
//!
//! An amount `a` in `[0, 2^34)` is decomposed into bits; bit `i` is
//! committed as a pair of candidate points
//! `P_{i,0} = commit(y_i, b_i * 2^i)` and `P_{i,1} = P_{i,0} - [2^i]H`.
//! Exactly one of the pair is the pure blinding point `[y_i]G` (the prover
//! knows its scalar), so a two-branch Schnorr ring per bit proves
//! `b_i ∈ {0, 1}` without revealing which. All rings share one challenge
//! `e0` chained through the per-bit nonce commitments.
//!
//! The per-bit blindings are a deterministic hash chain seeded from the
//! output's target blinding (see [`derive_bit_blindings`]); a recipient who
//! recovers that seed regenerates the chain and decrypts the amount by
//! testing which branch of each pair cancels. No extra ciphertext rides in
//! the output.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::curve::{
    close_ring, hash_to_scalar, hash_with_point, response_point, CurvePoint, CurveScalar,
};
use super::pedersen;
use crate::constants::RANGE_PROOF_LENGTH;
use crate::{constant_time_eq, Hash};

/// A bitwise ring-signature range proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeProof {
    /// Shared ring challenge.
    pub e0: Hash,
    /// Per-bit response pairs `(s_{i,0}, s_{i,1})`.
    pub responses: Vec<(CurveScalar, CurveScalar)>,
    /// Per-bit candidate commitment pairs `(P_{i,0}, P_{i,1})`.
    pub bit_commitments: Vec<(CurvePoint, CurvePoint)>,
}

/// Derive the per-bit blinding schedule from a target blinding `y`:
/// `y_0 = y`, `y_i = H(y_{i-1})` for the middle bits, and the last blinding
/// balances the chain so the whole schedule sums to `y` mod n.
///
/// This exact derivation is load-bearing: the recipient reruns it from the
/// recovered shared secret to decrypt amounts.
pub fn derive_bit_blindings(target: &CurveScalar) -> Vec<CurveScalar> {
    let mut blinds = Vec::with_capacity(RANGE_PROOF_LENGTH);
    let mut partial = CurveScalar::ZERO;
    blinds.push(*target);
    partial = partial.add(target);
    for i in 1..RANGE_PROOF_LENGTH - 1 {
        let y = hash_to_scalar(&[&blinds[i - 1].to_bytes()]);
        partial = partial.add(&y);
        blinds.push(y);
    }
    blinds.push(target.sub(&partial));
    blinds
}

/// The candidate pair for bit `i` of `amount` under blinding `blind`.
fn bit_commitment_pair(amount: u64, bit: usize, blind: &CurveScalar) -> (CurvePoint, CurvePoint) {
    let value = 1u64 << bit as u64;
    let committed = value & amount;
    let c0 = pedersen::commit_u64(blind, committed);
    let c1 = c0.sub(&pedersen::value_point(value));
    (c0, c1)
}

/// Digest binding all candidate pairs, mixed into every ring challenge.
fn hash_pairs(pairs: &[(CurvePoint, CurvePoint)]) -> Hash {
    let mut hasher = Sha256::new();
    for (c0, c1) in pairs {
        hasher.update(c0.to_bytes());
        hasher.update(c1.to_bytes());
    }
    hasher.finalize().into()
}

impl RangeProof {
    /// Prove that `amount` (its low 34 bits) is committed bit-by-bit under
    /// the blinding schedule seeded by `target_blind`.
    pub fn sign(amount: u64, target_blind: &CurveScalar) -> RangeProof {
        let blinds = derive_bit_blindings(target_blind);
        let pairs: Vec<_> = (0..RANGE_PROOF_LENGTH)
            .map(|i| bit_commitment_pair(amount, i, &blinds[i]))
            .collect();
        let msg = hash_pairs(&pairs);

        // Forward pass: nonce commitments. For a set bit the prover owns
        // branch 1, so R_i is an honest nonce point; for a clear bit the
        // prover owns branch 0 and fabricates R_i from a random s_{i,1}.
        let mut nonces = Vec::with_capacity(RANGE_PROOF_LENGTH);
        let mut nonce_points = Vec::with_capacity(RANGE_PROOF_LENGTH);
        let mut responses = vec![(CurveScalar::ZERO, CurveScalar::ZERO); RANGE_PROOF_LENGTH];
        for i in 0..RANGE_PROOF_LENGTH {
            let bit_set = (amount >> i as u64) & 1 == 1;
            let k = CurveScalar::random();
            let k_point = CurvePoint::base_mul(&k);
            if bit_set {
                nonce_points.push(k_point);
            } else {
                let e1 = hash_with_point(&msg, &k_point);
                let s1 = CurveScalar::random();
                responses[i].1 = s1;
                nonce_points.push(response_point(&s1, &e1, &pairs[i].1));
            }
            nonces.push(k);
        }

        // Shared challenge over all nonce commitments.
        let mut e0_data = Sha256::new();
        e0_data.update(msg);
        for point in &nonce_points {
            e0_data.update(point.to_bytes());
        }
        let e0: Hash = e0_data.finalize().into();

        // Close each ring on the branch whose scalar the prover knows.
        for i in 0..RANGE_PROOF_LENGTH {
            let bit_set = (amount >> i as u64) & 1 == 1;
            if bit_set {
                let s0 = CurveScalar::random();
                responses[i].0 = s0;
                let e1 = hash_with_point(&msg, &response_point(&s0, &e0, &pairs[i].0));
                responses[i].1 = close_ring(&blinds[i], &nonces[i], &e1);
            } else {
                responses[i].0 = close_ring(&blinds[i], &nonces[i], &e0);
            }
        }

        RangeProof {
            e0,
            responses,
            bit_commitments: pairs,
        }
    }

    /// Recompute every ring from `e0` and accept iff the chain closes.
    pub fn verify(&self) -> bool {
        if self.responses.len() != RANGE_PROOF_LENGTH
            || self.bit_commitments.len() != RANGE_PROOF_LENGTH
        {
            return false;
        }
        let msg = hash_pairs(&self.bit_commitments);
        let mut e0_data = Sha256::new();
        e0_data.update(msg);
        for i in 0..RANGE_PROOF_LENGTH {
            let (s0, s1) = &self.responses[i];
            let (c0, c1) = &self.bit_commitments[i];
            let e1 = hash_with_point(&msg, &response_point(s0, &self.e0, c0));
            let r2 = response_point(s1, &e1, c1);
            e0_data.update(r2.to_bytes());
        }
        let recomputed: Hash = e0_data.finalize().into();
        constant_time_eq(&self.e0, &recomputed)
    }

    /// The Pedersen total: sum of the `P_{i,0}` candidates.
    ///
    /// Equals `commit(y, a)` for the schedule seed `y` and committed
    /// amount `a`, by the commitment homomorphism.
    pub fn commitment_point(&self) -> CurvePoint {
        self.bit_commitments
            .iter()
            .fold(CurvePoint::EMPTY, |acc, (c0, _)| acc.add(c0))
    }

    /// Decode bit `i` given its blinding: the branch that cancels to the
    /// identity reveals the bit. `None` if neither branch cancels (wrong
    /// blinding, i.e. not our output).
    pub fn recover_bit(&self, bit: usize, blind: &CurveScalar) -> Option<bool> {
        let (c0, c1) = self.bit_commitments.get(bit)?;
        let blind_point = CurvePoint::base_mul(blind);
        if c0.sub(&blind_point).is_empty() {
            Some(false)
        } else if c1.sub(&blind_point).is_empty() {
            Some(true)
        } else {
            None
        }
    }
}

/// A Pedersen commitment with its embedded range proof: what an output
/// carries on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    /// The Pedersen point `commit(y, a)`.
    pub point: CurvePoint,
    /// Proof that the committed amount lies in `[0, 2^34)`.
    pub proof: RangeProof,
}

impl Commitment {
    /// Commit to `amount` under the blinding schedule seeded by `blind`.
    pub fn commit(amount: u64, blind: &CurveScalar) -> Commitment {
        let proof = RangeProof::sign(amount, blind);
        Commitment {
            point: proof.commitment_point(),
            proof,
        }
    }

    /// Network-side verification: the range rings close and the summed
    /// per-bit commitments equal the claimed Pedersen point.
    pub fn verify(&self) -> bool {
        self.proof.verify() && self.proof.commitment_point() == self.point
    }

    /// Recover the committed amount with the schedule seed `blind`.
    ///
    /// Returns `None` when any bit fails to decode, which is the normal
    /// outcome for somebody else's output.
    pub fn decrypt_amount(&self, blind: &CurveScalar) -> Option<u64> {
        let blinds = derive_bit_blindings(blind);
        let mut total = 0u64;
        for (i, bit_blind) in blinds.iter().enumerate() {
            match self.proof.recover_bit(i, bit_blind)? {
                true => total += 1u64 << i as u64,
                false => {}
            }
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blinding_schedule_sums_to_target() {
        let target = CurveScalar::random();
        let blinds = derive_bit_blindings(&target);
        assert_eq!(blinds.len(), RANGE_PROOF_LENGTH);
        let sum = blinds
            .iter()
            .fold(CurveScalar::ZERO, |acc, b| acc.add(b));
        assert_eq!(sum, target);
    }

    #[test]
    fn blinding_schedule_deterministic() {
        let target = CurveScalar::from_u64(99);
        let a = derive_bit_blindings(&target);
        let b = derive_bit_blindings(&target);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn sign_verify_various_amounts() {
        for amount in [0u64, 1, 2, 3, 5_000_000_000, (1 << 34) - 1] {
            let blind = CurveScalar::random();
            let proof = RangeProof::sign(amount, &blind);
            assert!(proof.verify(), "amount {amount} failed to verify");
        }
    }

    #[test]
    fn commitment_point_matches_pedersen() {
        let blind = CurveScalar::random();
        let amount = 123_456_789u64;
        let proof = RangeProof::sign(amount, &blind);
        assert_eq!(
            proof.commitment_point(),
            pedersen::commit_u64(&blind, amount)
        );
    }

    #[test]
    fn oversized_amount_commits_low_bits_only() {
        // 2^34 has no bits inside the proof range: commits to zero
        let blind = CurveScalar::random();
        let proof = RangeProof::sign(1u64 << 34, &blind);
        assert!(proof.verify());
        assert_eq!(proof.commitment_point(), pedersen::commit_u64(&blind, 0));
    }

    #[test]
    fn tampered_response_fails() {
        let blind = CurveScalar::random();
        let mut proof = RangeProof::sign(42, &blind);
        proof.responses[3].0 = CurveScalar::random();
        assert!(!proof.verify());
    }

    #[test]
    fn tampered_challenge_fails() {
        let blind = CurveScalar::random();
        let mut proof = RangeProof::sign(42, &blind);
        proof.e0[0] ^= 1;
        assert!(!proof.verify());
    }

    #[test]
    fn truncated_proof_fails() {
        let blind = CurveScalar::random();
        let mut proof = RangeProof::sign(42, &blind);
        proof.responses.pop();
        assert!(!proof.verify());
    }

    #[test]
    fn commitment_verify_rejects_wrong_point() {
        let blind = CurveScalar::random();
        let mut commitment = Commitment::commit(7, &blind);
        commitment.point = pedersen::commit_u64(&blind, 8);
        assert!(commitment.proof.verify());
        assert!(!commitment.verify());
    }

    #[test]
    fn decrypt_roundtrip() {
        for amount in [0u64, 1, 77, 5_000_000_000] {
            let blind = CurveScalar::random();
            let commitment = Commitment::commit(amount, &blind);
            assert_eq!(commitment.decrypt_amount(&blind), Some(amount));
        }
    }

    #[test]
    fn decrypt_with_wrong_blind_fails() {
        let blind = CurveScalar::random();
        let commitment = Commitment::commit(1234, &blind);
        assert_eq!(commitment.decrypt_amount(&CurveScalar::random()), None);
    }

    #[test]
    fn zero_blind_commitment_decrypts() {
        // Coinbase case: zero blinding, amount fully determined by consensus
        let commitment = Commitment::commit(5_000_000_000, &CurveScalar::ZERO);
        assert!(commitment.verify());
        assert_eq!(
            commitment.decrypt_amount(&CurveScalar::ZERO),
            Some(5_000_000_000)
        );
        assert_eq!(commitment.point, pedersen::value_point(5_000_000_000));
    }
}
