//! # Obscura
//!
//! A privacy-preserving proof-of-work cryptocurrency:
//! - **Confidential amounts** — Pedersen commitments with bitwise
//!   ring-signature range proofs; only sender and recipient learn values
//! - **Stealth addresses** — every output pays a one-time destination key
//!   unlinkable to the recipient's published address
//! - **Linkable ring signatures (OZRS)** — each spend hides among decoy
//!   inputs while a key image exposes double-spends, and the same signature
//!   proves input commitments balance outputs plus fee
//! - **Longest-chain consensus** — main/side/orphan chain partitions with
//!   atomic reorganization and leading-zero-bits proof of work

pub mod chain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod miner;
pub mod network;
pub mod node;
pub mod storage;
pub mod transaction;
pub mod wallet;

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// Protocol constants
pub mod constants {
    /// Ring size: every transaction spends behind exactly this many inputs
    pub const TXN_NUM_INPUTS: usize = 8;
    /// Every non-coinbase transaction has exactly this many outputs
    pub const TXN_NUM_OUTPUTS: usize = 2;
    /// Bit length of range proofs; committed values lie in [0, 2^34)
    pub const RANGE_PROOF_LENGTH: usize = 34;
    /// SHA-256 digest length in bytes
    pub const DIGEST_LENGTH: usize = 32;

    /// Blocks between difficulty retargets
    pub const DIFFICULTY_SPACING: u64 = 2016;
    /// Target wall-clock seconds per retarget window
    pub const TWO_WEEKS_SEC: u64 = 14 * 24 * 3600;
    /// Difficulty (leading zero bits) before the first retarget
    pub const INITIAL_DIFFICULTY: u64 = 16;
    /// Maximum serialized transaction size in bytes (2 GiB)
    pub const MAX_TXN_BYTES: usize = 2 * 1024 * 1024 * 1024;
    /// Blocks between subsidy halvings
    pub const SUBSIDY_HALVING_INTERVAL: u64 = 21_000;
    /// Base block subsidy in atomic units (50 coins)
    pub const BASE_SUBSIDY: u64 = 50 * 100_000_000;

    /// Scalar defining the second Pedersen generator H = [11235]G
    pub const PEDERSEN_H_SCALAR: u64 = 11235;

    /// Headers older than this (seconds behind wall clock) are rejected
    pub const MAX_HEADER_AGE_SEC: u64 = 2 * 3600;

    /// Maximum network frame payload size (64 MiB).
    ///
    /// Smaller than [`MAX_TXN_BYTES`]: the frame cap guards allocation from
    /// untrusted length prefixes, the transaction cap bounds the data model.
    pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
    /// Peer dial timeout in milliseconds
    pub const PEER_DIAL_TIMEOUT_MS: u64 = 5_000;
    /// Default P2P listen port
    pub const DEFAULT_P2P_PORT: u16 = 9471;

    /// Block subsidy at a given height: halves every
    /// [`SUBSIDY_HALVING_INTERVAL`] blocks.
    pub fn block_subsidy(seq_num: u64) -> u64 {
        let halvings = seq_num / SUBSIDY_HALVING_INTERVAL;
        if halvings >= 64 {
            return 0;
        }
        BASE_SUBSIDY >> halvings
    }
}

/// 32-byte SHA-256 digest, the sole identifier type in the protocol.
///
/// Blocks reference parents, transactions reference input outputs, and the
/// derived indices key everything by this digest; no object graph exists.
pub type Hash = [u8; 32];

/// The all-zeroes digest: genesis parent and coinbase input sentinel.
pub const ZERO_HASH: Hash = [0u8; 32];

/// SHA-256 of a byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// SHA-256 over concatenated parts.
///
/// All callers feed fixed-length curve-point and digest encodings, so plain
/// concatenation is unambiguous.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Errors from canonical encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
}

/// Size-limited bincode options shared by hashing, storage, and the wire.
///
/// One canonical encoding everywhere: an object's hash is the hash of these
/// bytes, and re-encoding a decoded object reproduces them.
fn canonical_options() -> impl bincode::Options {
    use bincode::Options;
    bincode::DefaultOptions::new().with_limit(constants::MAX_FRAME_BYTES as u64)
}

/// Encode a value to its canonical byte form.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    use bincode::Options;
    canonical_options()
        .serialize(value)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a value from its canonical byte form.
pub fn from_canonical_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    use bincode::Options;
    canonical_options()
        .deserialize(bytes)
        .map_err(|e| CodecError::Decode(e.to_string()))
}

/// Hash of a value's canonical byte form.
///
/// Encoding failure is a programming error (the data model always encodes),
/// surfaced as a panic rather than polluting every call site with Results.
pub fn canonical_hash<T: Serialize>(value: &T) -> Hash {
    let bytes = to_canonical_bytes(value).expect("canonical encoding of protocol type");
    sha256(&bytes)
}

/// Constant-time comparison of two byte slices.
///
/// The length check is not constant-time; every caller compares fixed-size
/// digests, so only contents are secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
