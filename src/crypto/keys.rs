//! Wallet keys: the two-tier stealth address scheme.
//!
//! A published address is a pair of points `(track_pk, spend_pk)`. Senders
//! derive a fresh one-time destination from it per output, so observers
//! cannot link outputs to the address. The tracking secret alone detects
//! incoming payments (safe to give a watch-only service); the spend secret
//! is additionally required to compute the one-time spend scalar.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::curve::{CurvePoint, CurveScalar};
use crate::{canonical_hash, Hash};

/// A published stealth address: tracking and spending public points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicAddress {
    /// `[tsk]G`, used by senders to build the shared secret.
    pub track_pk: CurvePoint,
    /// `[psk]G`, folded into every one-time destination key.
    pub spend_pk: CurvePoint,
}

impl PublicAddress {
    /// Digest identifying this address.
    pub fn hash(&self) -> Hash {
        canonical_hash(self)
    }
}

/// Address plus the tracking secret: detects incoming payments but cannot
/// spend them.
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackingKey {
    pub address: PublicAddress,
    pub(crate) track_sk: CurveScalar,
}

impl Drop for TrackingKey {
    fn drop(&mut self) {
        self.track_sk.zeroize();
    }
}

impl std::fmt::Debug for TrackingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Full wallet key: tracking plus the spending secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateKey {
    pub tracking: TrackingKey,
    pub(crate) spend_sk: CurveScalar,
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.spend_sk.zeroize();
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("address", &self.tracking.address)
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    /// Generate a fresh wallet key from OS entropy.
    pub fn generate() -> PrivateKey {
        let track_sk = CurveScalar::random();
        let spend_sk = CurveScalar::random();
        PrivateKey {
            tracking: TrackingKey {
                address: PublicAddress {
                    track_pk: CurvePoint::base_mul(&track_sk),
                    spend_pk: CurvePoint::base_mul(&spend_sk),
                },
                track_sk,
            },
            spend_sk,
        }
    }

    pub fn address(&self) -> PublicAddress {
        self.tracking.address
    }

    pub fn tracking(&self) -> &TrackingKey {
        &self.tracking
    }
}
