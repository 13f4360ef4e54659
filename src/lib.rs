//! Flipcore - Provably Fair Flip Session Engine
//!
//! Session engine for a real-money flip wagering game: commit-reveal
//! fairness, an escalating zero-probability risk curve, weighted payout
//! selection, a stake-locking wallet ledger, and a session state machine
//! with pause/resume, cashout, and server-side expiry.

pub mod config;
pub mod errors;
pub mod events;
pub mod fairness;
pub mod guard;
pub mod payout;
pub mod risk;
pub mod session;
pub mod store;
pub mod sweep;
pub mod types;
pub mod wallet;

pub use config::{ConfigLoader, ConfigRegistry, ConfigSnapshot, EngineConfig, GameConfig};
pub use errors::{EngineError, EngineResult};
pub use events::{EventBus, GameEvent};
pub use fairness::{SeedCommit, VerificationBundle};
pub use guard::AntiAbuseGuard;
pub use payout::{PayoutTable, Resolution};
pub use session::{
    CashoutReceipt, DrawReport, EngineStats, PauseReceipt, SessionEngine, SessionView,
    StartReceipt,
};
pub use store::{AuditStore, SessionRecord, SnapshotRecord};
pub use sweep::ExpirySweeper;
pub use types::{
    Currency, Denomination, DrawOutcome, DrawRecord, OverrideMode, OverrideScope, SessionStatus,
    SimulationOverride,
};
pub use wallet::{TransactionKind, WalletLedger, WalletTransaction, WalletView};
