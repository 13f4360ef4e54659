//! Provably fair draw mechanism: commit-reveal server seed plus a
//! deterministic keyed-hash roll.
//!
//! The server commits to a secret seed by publishing its SHA-256 digest at
//! session start. Every roll is a pure function of
//! `(server_seed, session_id, draw_index, client_seed)`, so once the seed is
//! revealed after the session ends, every recorded draw can be recomputed and
//! checked independently.

use crate::errors::{EngineError, EngineResult};
use crate::payout::{self, PayoutTable, Resolution};
use crate::types::{DrawOutcome, DrawRecord};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A freshly generated server seed and its public commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedCommit {
    /// Hex-encoded 32-byte secret. Kept server-side until the session is
    /// terminal.
    pub server_seed: String,
    /// SHA-256 digest of the seed string, shown to the player at start.
    pub server_seed_hash: String,
}

/// Everything needed to independently recompute a finished session's draws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationBundle {
    pub session_id: Uuid,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub stake_minor: i64,
    pub snapshot_id: Uuid,
    pub draws: Vec<DrawRecord>,
}

/// Generate a high-entropy server seed and its one-way commitment.
pub fn commit() -> SeedCommit {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let server_seed = hex::encode(bytes);
    let server_seed_hash = hash_seed(&server_seed);
    SeedCommit {
        server_seed,
        server_seed_hash,
    }
}

/// SHA-256 digest of a seed string, hex-encoded.
pub fn hash_seed(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Check a revealed seed against its published commitment.
pub fn verify_commit(server_seed: &str, server_seed_hash: &str) -> bool {
    hash_seed(server_seed) == server_seed_hash
}

/// Deterministic keyed-hash roll in `[0, 1)`.
///
/// Identical inputs always yield identical output; this is what makes
/// post-hoc verification possible. The top 53 bits of the digest are used so
/// the value is exactly representable as an `f64`.
pub fn roll(server_seed: &str, session_id: &Uuid, draw_index: u32, client_seed: &str) -> f64 {
    let message = format!(
        "{}:{}:{}:{}",
        server_seed, session_id, draw_index, client_seed
    );
    let digest = Sha256::digest(message.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let bits = u64::from_be_bytes(prefix) >> 11;
    bits as f64 / (1u64 << 53) as f64
}

/// Replay every draw in a terminal session against the revealed seed and the
/// session's payout table. Fails on the first mismatch.
pub fn verify_bundle(bundle: &VerificationBundle, table: &PayoutTable) -> EngineResult<()> {
    if !verify_commit(&bundle.server_seed, &bundle.server_seed_hash) {
        return Err(EngineError::VerificationFailed(format!(
            "revealed seed does not match commitment for session {}",
            bundle.session_id
        )));
    }

    for record in &bundle.draws {
        let expected_roll = roll(
            &bundle.server_seed,
            &bundle.session_id,
            record.draw_index,
            &bundle.client_seed,
        );
        if expected_roll.to_bits() != record.roll.to_bits() {
            return Err(EngineError::VerificationFailed(format!(
                "draw {} roll mismatch: recorded {} recomputed {}",
                record.draw_index, record.roll, expected_roll
            )));
        }

        let resolution = payout::resolve(
            record.roll,
            record.zero_probability,
            table,
            bundle.stake_minor,
        );
        match (&resolution, &record.outcome) {
            (Resolution::Zero, DrawOutcome::Zero) => {}
            (
                Resolution::Payout {
                    denomination_id,
                    payout_minor,
                    ..
                },
                DrawOutcome::Denomination { id },
            ) if denomination_id == id && *payout_minor == record.payout_minor => {}
            _ => {
                return Err(EngineError::VerificationFailed(format!(
                    "draw {} outcome mismatch: recorded {:?}",
                    record.draw_index, record.outcome
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_is_verifiable() {
        let commit = commit();
        assert_eq!(commit.server_seed.len(), 64);
        assert_eq!(commit.server_seed_hash.len(), 64);
        assert!(verify_commit(&commit.server_seed, &commit.server_seed_hash));
    }

    #[test]
    fn test_tampered_seed_rejected() {
        let commit = commit();
        assert!(!verify_commit("not-the-seed", &commit.server_seed_hash));
    }

    #[test]
    fn test_roll_deterministic() {
        let session_id = Uuid::new_v4();
        let a = roll("seed", &session_id, 1, "client");
        let b = roll("seed", &session_id, 1, "client");
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_roll_in_unit_interval() {
        let session_id = Uuid::new_v4();
        for index in 1..=1000 {
            let value = roll("seed", &session_id, index, "");
            assert!((0.0..1.0).contains(&value), "roll {} out of range", value);
        }
    }

    #[test]
    fn test_roll_varies_with_inputs() {
        let session_id = Uuid::new_v4();
        let base = roll("seed", &session_id, 1, "client");
        assert_ne!(base.to_bits(), roll("seed", &session_id, 2, "client").to_bits());
        assert_ne!(base.to_bits(), roll("other", &session_id, 1, "client").to_bits());
        assert_ne!(base.to_bits(), roll("seed", &session_id, 1, "other").to_bits());
    }
}
