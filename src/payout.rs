//! Stake-relative payout selection over a cumulative-weight partition.
//!
//! A single stored roll resolves the entire draw: the zero decision uses the
//! raw roll against the zero probability, and surviving rolls are rescaled
//! back onto `[0, 1)` and mapped onto the weight partition of the active
//! non-zero denominations. Payouts are always `stake × multiplier / 100` —
//! never a fixed currency amount — so the realized house edge is independent
//! of stake size.

use crate::errors::{EngineError, EngineResult};
use crate::types::{percent_of, Denomination};
use uuid::Uuid;

/// One slot of the precomputed partition.
#[derive(Debug, Clone)]
pub struct PayoutEntry {
    pub denomination_id: Uuid,
    pub value_minor: i64,
    pub multiplier_percent: u32,
    /// Upper partition boundary: sum of weights up to and including this entry.
    pub cumulative_weight: u64,
}

/// Precomputed selection table for one config snapshot. Entries are in a
/// stable `(value, id)` order so selection is reproducible from the roll
/// alone.
#[derive(Debug, Clone)]
pub struct PayoutTable {
    entries: Vec<PayoutEntry>,
    total_weight: u64,
}

/// Result of resolving one roll.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Zero,
    Payout {
        denomination_id: Uuid,
        value_minor: i64,
        payout_minor: i64,
    },
}

impl PayoutTable {
    /// Build the partition from a denomination set. Inactive, zero-flagged
    /// and zero-weight entries are excluded; at least one positive-weight
    /// paying entry must remain.
    pub fn build(denominations: &[Denomination]) -> EngineResult<Self> {
        let mut paying: Vec<&Denomination> = denominations
            .iter()
            .filter(|d| d.active && !d.is_zero && d.weight > 0)
            .collect();
        paying.sort_by(|a, b| {
            a.value_minor
                .cmp(&b.value_minor)
                .then_with(|| a.id.cmp(&b.id))
        });

        if paying.is_empty() {
            return Err(EngineError::Config(
                "denomination set has no active paying entries with positive weight".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(paying.len());
        let mut cumulative = 0u64;
        for denomination in paying {
            cumulative += denomination.weight as u64;
            entries.push(PayoutEntry {
                denomination_id: denomination.id,
                value_minor: denomination.value_minor,
                multiplier_percent: denomination.payout_multiplier_percent,
                cumulative_weight: cumulative,
            });
        }

        Ok(Self {
            entries,
            total_weight: cumulative,
        })
    }

    /// Map a rescaled roll in `[0, 1)` to a denomination. The partition
    /// covers the unit interval with no gaps or overlaps, so every input
    /// lands on exactly one entry.
    pub fn select(&self, unit_roll: f64) -> &PayoutEntry {
        let target = unit_roll * self.total_weight as f64;
        let (last, head) = self
            .entries
            .split_last()
            .expect("payout table is never empty after build");
        for entry in head {
            if target < entry.cumulative_weight as f64 {
                return entry;
            }
        }
        last
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn entries(&self) -> &[PayoutEntry] {
        &self.entries
    }
}

/// Resolve a raw roll against the zero probability and the payout table.
///
/// `zero_probability >= 1.0` only ever arrives from a simulation override;
/// the risk curve itself is capped below certainty.
pub fn resolve(
    roll: f64,
    zero_probability: f64,
    table: &PayoutTable,
    stake_minor: i64,
) -> Resolution {
    if zero_probability >= 1.0 || roll < zero_probability {
        return Resolution::Zero;
    }
    let rescaled = (roll - zero_probability) / (1.0 - zero_probability);
    let entry = table.select(rescaled);
    Resolution::Payout {
        denomination_id: entry.denomination_id,
        value_minor: entry.value_minor,
        payout_minor: percent_of(stake_minor, entry.multiplier_percent),
    }
}
