//! Error types for the flip session engine.
//!
//! Every validation failure is surfaced to the caller with its specific kind;
//! nothing is coerced into a generic failure.

use crate::types::SessionStatus;
use uuid::Uuid;

/// Root error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient funds: requested {requested} but only {available} available")]
    InsufficientFunds { requested: i64, available: i64 },

    #[error("stake {stake} is below the configured minimum {min_stake}")]
    StakeBelowMinimum { stake: i64, min_stake: i64 },

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {id} is not active (status: {status})")]
    SessionNotActive { id: Uuid, status: SessionStatus },

    #[error("player {player_id} already has session {session_id} in play")]
    SessionAlreadyActive { player_id: String, session_id: Uuid },

    #[error("cashout requires at least {required} draws ({completed} completed)")]
    CashoutBelowMinDraws { completed: u32, required: u32 },

    #[error("config snapshot {0} is no longer active for new sessions")]
    ConfigInactive(Uuid),

    #[error("session {0} is not settled; verification requires a terminal session")]
    SessionNotSettled(Uuid),

    #[error("no game configuration published for currency {0}")]
    UnknownCurrency(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("ledger integrity violation: {0}")]
    LedgerIntegrity(String),

    #[error("fairness verification failed: {0}")]
    VerificationFailed(String),
}

/// Convenience type alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("record encoding failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::StakeBelowMinimum {
            stake: 50,
            min_stake: 100,
        };
        assert!(err.to_string().contains("50"));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_not_active_carries_status() {
        let err = EngineError::SessionNotActive {
            id: Uuid::new_v4(),
            status: SessionStatus::Lost,
        };
        assert!(err.to_string().contains("lost"));
    }
}
