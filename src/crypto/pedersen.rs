//! Pedersen commitments over P-256.
//!
//! `commit(x, a) = [x]G + [a]H` hides the amount `a` behind the blinding
//! scalar `x` and is additively homomorphic:
//! `commit(x1, a1) + commit(x2, a2) = commit(x1 + x2, a1 + a2)`.
//! The range proof and OZRS both lean on that homomorphism: sums of
//! commitments cancel to pure blinding points when amounts balance.
//!
//! No per-call randomness; a commitment is deterministic in its inputs.

use super::curve::{generator_h, CurvePoint, CurveScalar};

/// `[blind]G + [amount]H` with the standard second generator.
pub fn commit(blind: &CurveScalar, amount: &CurveScalar) -> CurvePoint {
    commit_pk(blind, amount, &generator_h())
}

/// [`commit`] with a `u64` amount.
pub fn commit_u64(blind: &CurveScalar, amount: u64) -> CurvePoint {
    commit(blind, &CurveScalar::from_u64(amount))
}

/// `[blind]G + [amount]P` for an arbitrary second base.
pub fn commit_pk(blind: &CurveScalar, amount: &CurveScalar, base: &CurvePoint) -> CurvePoint {
    CurvePoint::base_mul(blind).add(&base.mul(amount))
}

/// `[blind]G - [amount]P` for an arbitrary second base.
pub fn diff_pk(blind: &CurveScalar, amount: &CurveScalar, base: &CurvePoint) -> CurvePoint {
    CurvePoint::base_mul(blind).sub(&base.mul(amount))
}

/// `[amount]H`: a zero-blinding commitment (fees, coinbase values).
pub fn value_point(amount: u64) -> CurvePoint {
    generator_h().mul(&CurveScalar::from_u64(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_is_deterministic() {
        let blind = CurveScalar::from_u64(7);
        assert_eq!(commit_u64(&blind, 1000), commit_u64(&blind, 1000));
    }

    #[test]
    fn commit_hides_behind_blinding() {
        let b1 = CurveScalar::random();
        let b2 = CurveScalar::random();
        assert_ne!(commit_u64(&b1, 100), commit_u64(&b2, 100));
    }

    #[test]
    fn homomorphic_addition() {
        let x1 = CurveScalar::random();
        let x2 = CurveScalar::random();
        let summed = commit_u64(&x1, 30).add(&commit_u64(&x2, 12));
        let direct = commit_u64(&x1.add(&x2), 42);
        assert_eq!(summed, direct);
    }

    #[test]
    fn balanced_commitments_cancel() {
        // in - out - fee*H leaves only the blinding difference on G
        let y_in = CurveScalar::random();
        let y_out = CurveScalar::random();
        let input = commit_u64(&y_in, 50);
        let output = commit_u64(&y_out, 49);
        let fee = value_point(1);
        let diff = input.sub(&output).sub(&fee);
        assert_eq!(diff, CurvePoint::base_mul(&y_in.sub(&y_out)));
    }

    #[test]
    fn diff_pk_inverts_commit_pk() {
        let blind = CurveScalar::random();
        let amount = CurveScalar::from_u64(9);
        let base = CurvePoint::base_mul(&CurveScalar::random());
        let c = commit_pk(&blind, &amount, &base);
        let d = diff_pk(&blind, &amount, &base);
        // c + d == 2*blind*G
        assert_eq!(c.add(&d), CurvePoint::base_mul(&blind.add(&blind)));
    }

    #[test]
    fn zero_blind_commitment_is_pure_value() {
        assert_eq!(commit_u64(&CurveScalar::ZERO, 5), value_point(5));
    }
}
