//! Thin wrappers over P-256 group and scalar arithmetic.
//!
//! All protocol points and scalars flow through [`CurvePoint`] and
//! [`CurveScalar`] so that serialization, hashing, and the identity sentinel
//! live in one place. Scalar multiplication is constant-time via the
//! underlying `p256` field implementation; secret scalars must never take a
//! variable-time path.
//!
//! The group identity doubles as the protocol's "empty point": coinbase
//! blind seeds are empty, and ring equations test for cancellation by
//! comparing against it.

use std::sync::OnceLock;

use p256::elliptic_curve::bigint::U256;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::elliptic_curve::{Field, Group, PrimeField};
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{sha256, sha256_concat, Hash};

/// Length of a serialized point: SEC1 compressed, or all zeroes for empty.
pub const POINT_BYTES: usize = 33;

/// An element of the P-256 scalar field Z_n.
#[derive(Clone, Copy, PartialEq)]
pub struct CurveScalar(pub(crate) Scalar);

impl CurveScalar {
    pub const ZERO: CurveScalar = CurveScalar(Scalar::ZERO);

    /// Draw a uniformly random scalar from the OS entropy source.
    pub fn random() -> Self {
        CurveScalar(Scalar::random(&mut rand::rngs::OsRng))
    }

    pub fn from_u64(value: u64) -> Self {
        CurveScalar(Scalar::from(value))
    }

    /// Interpret 32 bytes as an integer and reduce mod n.
    pub fn reduce_bytes(bytes: &Hash) -> Self {
        let repr: FieldBytes = (*bytes).into();
        CurveScalar(<Scalar as Reduce<U256>>::reduce_bytes(&repr))
    }

    /// Canonical 32-byte big-endian encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        let repr = self.0.to_repr();
        let mut out = [0u8; 32];
        out.copy_from_slice(&repr);
        out
    }

    /// Parse a canonical encoding; rejects values >= n.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let repr: FieldBytes = (*bytes).into();
        Option::<Scalar>::from(Scalar::from_repr(repr)).map(CurveScalar)
    }

    pub fn is_zero(&self) -> bool {
        bool::from(self.0.is_zero())
    }

    pub fn add(&self, other: &CurveScalar) -> CurveScalar {
        CurveScalar(self.0 + other.0)
    }

    pub fn sub(&self, other: &CurveScalar) -> CurveScalar {
        CurveScalar(self.0 - other.0)
    }

    pub fn mul(&self, other: &CurveScalar) -> CurveScalar {
        CurveScalar(self.0 * other.0)
    }
}

impl std::fmt::Debug for CurveScalar {
    /// Redacted: scalars are frequently secret (spend keys, blindings).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CurveScalar([REDACTED])")
    }
}

impl Zeroize for CurveScalar {
    fn zeroize(&mut self) {
        self.0 = Scalar::ZERO;
    }
}

impl Serialize for CurveScalar {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.to_bytes(), s)
    }
}

impl<'de> Deserialize<'de> for CurveScalar {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: [u8; 32] = serde::Deserialize::deserialize(d)?;
        CurveScalar::from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::custom("non-canonical P-256 scalar"))
    }
}

/// A point on the P-256 curve.
///
/// The identity element is the protocol's "empty" sentinel; it serializes
/// as 33 zero bytes, all other points as SEC1 compressed form.
#[derive(Clone, Copy, PartialEq)]
pub struct CurvePoint(pub(crate) ProjectivePoint);

impl CurvePoint {
    /// The group identity, used as the uninitialized-point sentinel.
    pub const EMPTY: CurvePoint = CurvePoint(ProjectivePoint::IDENTITY);

    pub fn generator() -> CurvePoint {
        CurvePoint(ProjectivePoint::GENERATOR)
    }

    /// `[s]G`: constant-time fixed-base multiplication.
    pub fn base_mul(s: &CurveScalar) -> CurvePoint {
        CurvePoint(ProjectivePoint::GENERATOR * s.0)
    }

    /// `[s]P`: constant-time variable-base multiplication.
    pub fn mul(&self, s: &CurveScalar) -> CurvePoint {
        CurvePoint(self.0 * s.0)
    }

    pub fn add(&self, other: &CurvePoint) -> CurvePoint {
        CurvePoint(self.0 + other.0)
    }

    pub fn sub(&self, other: &CurvePoint) -> CurvePoint {
        CurvePoint(self.0 - other.0)
    }

    pub fn neg(&self) -> CurvePoint {
        CurvePoint(-self.0)
    }

    /// True for the identity sentinel (never set, or fully cancelled sums).
    pub fn is_empty(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    /// Canonical 33-byte encoding: SEC1 compressed, identity as all zeroes.
    pub fn to_bytes(&self) -> [u8; POINT_BYTES] {
        let mut out = [0u8; POINT_BYTES];
        if self.is_empty() {
            return out;
        }
        let encoded = self.0.to_affine().to_encoded_point(true);
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    /// Parse the canonical encoding, validating curve membership.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != POINT_BYTES {
            return None;
        }
        if bytes.iter().all(|&b| b == 0) {
            return Some(CurvePoint::EMPTY);
        }
        let encoded = EncodedPoint::from_bytes(bytes).ok()?;
        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .map(|affine| CurvePoint(ProjectivePoint::from(affine)))
    }
}

impl std::fmt::Debug for CurvePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CurvePoint({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for CurvePoint {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.to_bytes().to_vec(), s)
    }
}

impl<'de> Deserialize<'de> for CurvePoint {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        CurvePoint::from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::custom("invalid P-256 point encoding"))
    }
}

/// The second Pedersen generator `H = [11235]G`.
///
/// Derived from G by a fixed scalar, so it is on-curve by construction; the
/// discrete log relationship is public but irrelevant to the hiding property
/// because blinding factors multiply G, not H.
pub fn generator_h() -> CurvePoint {
    static H: OnceLock<CurvePoint> = OnceLock::new();
    *H.get_or_init(|| {
        let h = CurvePoint::base_mul(&CurveScalar::from_u64(
            crate::constants::PEDERSEN_H_SCALAR,
        ));
        // An empty H would silently break every commitment.
        assert!(!h.is_empty(), "Pedersen generator H must be a valid point");
        h
    })
}

/// Hash arbitrary parts to a scalar (digest reduced mod n).
pub fn hash_to_scalar(parts: &[&[u8]]) -> CurveScalar {
    CurveScalar::reduce_bytes(&sha256_concat(parts))
}

/// Interpret a digest (e.g. a ring challenge) as a scalar mod n.
pub fn scalar_from_hash(h: &Hash) -> CurveScalar {
    CurveScalar::reduce_bytes(h)
}

/// Hash a message and a point together: `H(m || P)`.
pub fn hash_with_point(m: &[u8], p: &CurvePoint) -> Hash {
    sha256_concat(&[m, &p.to_bytes()])
}

/// Map bytes to a curve point with try-and-increment.
///
/// Each candidate digest is treated as a compressed x-coordinate; roughly
/// half decompress, so the loop terminates after a couple of iterations in
/// expectation. The result has unknown discrete log with respect to G,
/// which is what makes key images unforgeable.
pub fn hash_to_point(data: &[u8]) -> CurvePoint {
    let mut counter: u32 = 0;
    loop {
        let digest = sha256_concat(&[data, &counter.to_be_bytes()]);
        let mut candidate = [0u8; POINT_BYTES];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);
        if let Ok(encoded) = EncodedPoint::from_bytes(candidate) {
            if let Some(affine) =
                Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            {
                let point = CurvePoint(ProjectivePoint::from(affine));
                if !point.is_empty() {
                    return point;
                }
            }
        }
        counter += 1;
    }
}

/// `[s]G - [e]P`: the recomputed ring commitment for a Schnorr-style link.
pub(crate) fn response_point(s: &CurveScalar, e: &Hash, p: &CurvePoint) -> CurvePoint {
    CurvePoint::base_mul(s).sub(&p.mul(&scalar_from_hash(e)))
}

/// `[s]B - [e]P`: as [`response_point`] but over an arbitrary base B.
pub(crate) fn response_point_base(
    s: &CurveScalar,
    base: &CurvePoint,
    e: &Hash,
    p: &CurvePoint,
) -> CurvePoint {
    base.mul(s).sub(&p.mul(&scalar_from_hash(e)))
}

/// Close one ring equation: `s = k + e * secret (mod n)`.
pub(crate) fn close_ring(secret: &CurveScalar, k: &CurveScalar, e: &Hash) -> CurveScalar {
    k.add(&scalar_from_hash(e).mul(secret))
}

/// Hash a point's canonical bytes.
pub fn point_digest(p: &CurvePoint) -> Hash {
    sha256(&p.to_bytes())
}
