//! Core domain types shared across the flip engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Currency reference data. Amounts everywhere in the engine are integers in
/// the currency's minor unit (cents, kobo, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Currency {
    pub code: String,
    pub symbol: String,
    /// Number of minor-unit digits (2 for cents).
    pub decimals: u32,
}

impl Currency {
    pub fn usd() -> Self {
        Self {
            code: "USD".to_string(),
            symbol: "$".to_string(),
            decimals: 2,
        }
    }

    pub fn ngn() -> Self {
        Self {
            code: "NGN".to_string(),
            symbol: "₦".to_string(),
            decimals: 2,
        }
    }

    pub fn kes() -> Self {
        Self {
            code: "KES".to_string(),
            symbol: "KSh".to_string(),
            decimals: 2,
        }
    }

    /// List of all supported currencies
    pub fn all_supported() -> Vec<Self> {
        vec![Self::usd(), Self::ngn(), Self::kes()]
    }

    /// Look up a supported currency by code, falling back to a generic
    /// two-decimal currency so operators can configure their own.
    pub fn from_code(code: &str) -> Self {
        Self::all_supported()
            .into_iter()
            .find(|c| c.code == code)
            .unwrap_or(Self {
                code: code.to_string(),
                symbol: code.to_string(),
                decimals: 2,
            })
    }

    /// Render a minor-unit amount for logs and CLI output.
    pub fn format_minor(&self, amount_minor: i64) -> String {
        let scale = 10i64.pow(self.decimals);
        let whole = amount_minor / scale;
        let frac = (amount_minor % scale).abs();
        format!(
            "{}{}.{:0width$}",
            self.symbol,
            whole,
            frac,
            width = self.decimals as usize
        )
    }
}

/// One entry of a currency's draw table. `value_minor` is display-only; the
/// credited amount is always `stake × payout_multiplier_percent / 100`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Denomination {
    pub id: Uuid,
    pub currency_code: String,
    pub value_minor: i64,
    pub payout_multiplier_percent: u32,
    /// Relative selection frequency among active non-zero entries.
    pub weight: u32,
    pub is_zero: bool,
    pub active: bool,
}

impl Denomination {
    /// A paying (non-forfeiting) denomination.
    pub fn paying(
        currency_code: &str,
        value_minor: i64,
        payout_multiplier_percent: u32,
        weight: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            currency_code: currency_code.to_string(),
            value_minor,
            payout_multiplier_percent,
            weight,
            is_zero: false,
            active: true,
        }
    }

    /// The forfeiting "zero" entry for a currency.
    pub fn zero(currency_code: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            currency_code: currency_code.to_string(),
            value_minor: 0,
            payout_multiplier_percent: 0,
            weight: 0,
            is_zero: true,
            active: true,
        }
    }
}

/// Session lifecycle states. `CashedOut`, `Lost` and `Expired` are terminal
/// and immutable. Sessions are born `Active`; the stake debit and session
/// creation are one atomic operation, so there is no provisional state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    CashedOut,
    Lost,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::CashedOut | SessionStatus::Lost | SessionStatus::Expired
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::CashedOut => write!(f, "cashedout"),
            SessionStatus::Lost => write!(f, "lost"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Outcome of a single draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DrawOutcome {
    /// Forfeiting outcome; the session ends and the stake is consumed.
    Zero,
    /// A paying denomination was selected.
    Denomination { id: Uuid },
}

/// Append-only record of one draw. Never mutated or deleted; the stored
/// `roll` and `zero_probability` let anyone replay the resolution once the
/// server seed is revealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawRecord {
    pub session_id: Uuid,
    /// 1-based draw index within the session.
    pub draw_index: u32,
    pub roll: f64,
    pub zero_probability: f64,
    pub outcome: DrawOutcome,
    pub payout_minor: i64,
    pub cashout_balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Simulation override scope: the whole platform or one player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "scope", content = "player_id", rename_all = "lowercase")]
pub enum OverrideScope {
    Global,
    Player(String),
}

/// Admin/test-only override modes that substitute or post-process the normal
/// roll computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverrideMode {
    Normal,
    AlwaysWin,
    AlwaysLose,
    ForceZeroAtDraw { draw_index: u32 },
    FixedProbability { probability: f64 },
    WinStreakThenLose { wins: u32 },
}

/// Admin/test-only outcome override with a remaining-uses budget. One use is
/// consumed per session the override affects; at zero it auto-disables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOverride {
    pub scope: OverrideScope,
    pub mode: OverrideMode,
    pub remaining_uses: u32,
}

/// Integer division with round-half-even (banker's rounding), used for every
/// minor-unit payout and fee computation.
pub fn round_half_even_div(numerator: i128, denominator: i128) -> i64 {
    debug_assert!(denominator > 0);
    let quotient = numerator.div_euclid(denominator);
    let remainder = numerator.rem_euclid(denominator);
    let doubled = remainder * 2;
    let rounded = if doubled > denominator || (doubled == denominator && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    };
    rounded as i64
}

/// `stake × percent / 100` in minor units, round-half-even.
pub fn percent_of(amount_minor: i64, percent: u32) -> i64 {
    round_half_even_div(amount_minor as i128 * percent as i128, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        // 2.5 -> 2, 3.5 -> 4 (ties go to even)
        assert_eq!(round_half_even_div(25, 10), 2);
        assert_eq!(round_half_even_div(35, 10), 4);
        assert_eq!(round_half_even_div(24, 10), 2);
        assert_eq!(round_half_even_div(26, 10), 3);
        assert_eq!(round_half_even_div(100, 100), 1);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(100, 8), 8);
        assert_eq!(percent_of(1000, 8), 80);
        // 125 × 2% = 2.5 -> rounds to even 2
        assert_eq!(percent_of(125, 2), 2);
        // 175 × 2% = 3.5 -> rounds to even 4
        assert_eq!(percent_of(175, 2), 4);
        assert_eq!(percent_of(100, 200), 200);
    }

    #[test]
    fn test_currency_format() {
        let usd = Currency::usd();
        assert_eq!(usd.format_minor(116), "$1.16");
        assert_eq!(usd.format_minor(100), "$1.00");
        assert_eq!(usd.format_minor(8), "$0.08");
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionStatus::CashedOut.is_terminal());
        assert!(SessionStatus::Lost.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }
}
