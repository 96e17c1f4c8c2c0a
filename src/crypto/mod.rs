//! Cryptographic core: P-256 arithmetic, Pedersen commitments, bitwise
//! range proofs, the OZRS linkable ring signature, and wallet keys.

pub mod curve;
pub mod keys;
pub mod ozrs;
pub mod pedersen;
pub mod range_proof;

pub use curve::{CurvePoint, CurveScalar};
