//! Session lifecycle state machine and draw orchestration.
//!
//! Each operation is a single atomic unit of work: the per-session mutex
//! serializes draws (index n+1 cannot start before index n commits), the
//! wallet mutation happens before any state transition so a ledger failure
//! rolls the whole operation back, and event emission is fire-and-forget
//! after the commit point.

use crate::config::{ConfigRegistry, ConfigSnapshot};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventBus, GameEvent};
use crate::fairness::{self, VerificationBundle};
use crate::guard::AntiAbuseGuard;
use crate::payout::{self, Resolution};
use crate::risk;
use crate::store::{AuditStore, SessionRecord};
use crate::types::{percent_of, DrawOutcome, DrawRecord, OverrideMode, SessionStatus};
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// A player's session. Owned exclusively by the engine; mutated only through
/// the defined transitions and immutable once terminal.
pub struct Session {
    pub id: Uuid,
    pub player_id: String,
    pub currency_code: String,
    pub stake_minor: i64,
    /// Secret until the session is terminal.
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub snapshot: Arc<ConfigSnapshot>,
    pub draw_count: u32,
    pub cashout_balance_minor: i64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub override_mode: Option<OverrideMode>,
    pub draws: Vec<DrawRecord>,
}

/// Returned by `start_session`; the hash is the fairness commitment shown to
/// the player before any draw.
#[derive(Debug, Clone, Serialize)]
pub struct StartReceipt {
    pub session_id: Uuid,
    pub server_seed_hash: String,
    pub stake_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawReport {
    pub session_id: Uuid,
    pub draw_index: u32,
    pub is_zero: bool,
    pub denomination_value_minor: Option<i64>,
    pub payout_minor: Option<i64>,
    pub cashout_balance_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashoutReceipt {
    pub session_id: Uuid,
    pub credited_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PauseReceipt {
    pub session_id: Uuid,
    pub fee_charged_minor: i64,
    pub remaining_balance_minor: i64,
}

/// Read-only session snapshot for callers. Never exposes the server seed.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub player_id: String,
    pub currency_code: String,
    pub stake_minor: i64,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub snapshot_id: Uuid,
    pub draw_count: u32,
    pub cashout_balance_minor: i64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Running totals across all sessions handled by this engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub sessions_started: u64,
    pub sessions_cashed_out: u64,
    pub sessions_lost: u64,
    pub sessions_expired: u64,
    pub total_staked_minor: i64,
    pub total_paid_out_minor: i64,
}

impl EngineStats {
    /// Realized return-to-player across completed stakes.
    pub fn rtp(&self) -> f64 {
        if self.total_staked_minor == 0 {
            return 0.0;
        }
        self.total_paid_out_minor as f64 / self.total_staked_minor as f64
    }

    pub fn house_edge(&self) -> f64 {
        1.0 - self.rtp()
    }
}

/// The session engine: start/draw/cashout/pause/resume/expire plus fairness
/// verification, wired to the wallet ledger, config registry, anti-abuse
/// guard and audit store.
pub struct SessionEngine {
    configs: Arc<ConfigRegistry>,
    ledger: Arc<WalletLedger>,
    guard: Arc<AntiAbuseGuard>,
    store: Arc<AuditStore>,
    events: EventBus,
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
    stats: Mutex<EngineStats>,
}

impl SessionEngine {
    pub fn new(
        configs: Arc<ConfigRegistry>,
        ledger: Arc<WalletLedger>,
        guard: Arc<AntiAbuseGuard>,
        store: Arc<AuditStore>,
    ) -> Self {
        Self {
            configs,
            ledger,
            guard,
            store,
            events: EventBus::new(1024),
            sessions: DashMap::new(),
            stats: Mutex::new(EngineStats::default()),
        }
    }

    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    pub fn config_registry(&self) -> &ConfigRegistry {
        &self.configs
    }

    pub fn guard(&self) -> &AntiAbuseGuard {
        &self.guard
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn with_stats(&self, f: impl FnOnce(&mut EngineStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn session_handle(&self, session_id: Uuid) -> EngineResult<Arc<Mutex<Session>>> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    fn lock_session(handle: &Arc<Mutex<Session>>) -> EngineResult<MutexGuard<'_, Session>> {
        handle
            .lock()
            .map_err(|_| EngineError::LedgerIntegrity("session lock poisoned".to_string()))
    }

    fn record_of(session: &Session) -> SessionRecord {
        SessionRecord {
            id: session.id,
            player_id: session.player_id.clone(),
            currency_code: session.currency_code.clone(),
            stake_minor: session.stake_minor,
            server_seed_hash: session.server_seed_hash.clone(),
            server_seed: session
                .status
                .is_terminal()
                .then(|| session.server_seed.clone()),
            client_seed: session.client_seed.clone(),
            snapshot_id: session.snapshot.id,
            draw_count: session.draw_count,
            cashout_balance_minor: session.cashout_balance_minor,
            status: session.status,
            started_at: session.started_at,
            ended_at: session.ended_at,
        }
    }

    /// Best-effort audit mirror; the in-memory state under the session lock
    /// is authoritative.
    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.store_session(&Self::record_of(session)) {
            tracing::warn!(session_id = %session.id, "failed to persist session record: {}", e);
        }
    }

    /// Terminal draw transition: the final draw and the settled session go
    /// into the store as one atomic batch.
    fn persist_settlement(&self, session: &Session, draw: &DrawRecord) {
        if let Err(e) = self
            .store
            .store_settlement(&Self::record_of(session), draw)
        {
            tracing::warn!(session_id = %session.id, "failed to persist settlement: {}", e);
        }
    }

    fn persist_draw(&self, record: &DrawRecord) {
        if let Err(e) = self.store.store_draw(record) {
            tracing::warn!(
                session_id = %record.session_id,
                draw_index = record.draw_index,
                "failed to persist draw record: {}",
                e
            );
        }
    }

    /// Server-held clock check; no client-reported timer is ever trusted.
    fn is_overdue(&self, session: &Session) -> bool {
        let elapsed = (Utc::now() - session.started_at).num_seconds();
        elapsed > session.snapshot.config.max_session_duration_secs as i64
    }

    /// Transition an overdue session to `expired`: the locked stake is
    /// consumed without credit, same money outcome as `lost` but a distinct
    /// status for audit.
    fn force_expire(&self, session: &mut Session) -> EngineResult<()> {
        self.ledger.release_stake(
            &session.player_id,
            &session.currency_code,
            session.stake_minor,
        )?;
        session.status = SessionStatus::Expired;
        session.ended_at = Some(Utc::now());
        self.guard.release(&session.player_id, session.id);
        self.persist(session);
        self.with_stats(|stats| stats.sessions_expired += 1);
        self.events.publish(GameEvent::SessionExpired {
            session_id: session.id,
            player_id: session.player_id.clone(),
        });
        tracing::info!(session_id = %session.id, player_id = %session.player_id, "session expired");
        Ok(())
    }

    /// Gate for player actions on an active session, enforcing expiry from
    /// the server clock before anything else.
    fn ensure_playable(&self, session: &mut Session) -> EngineResult<()> {
        match session.status {
            SessionStatus::Active => {
                if self.is_overdue(session) {
                    self.force_expire(session)?;
                    return Err(EngineError::SessionNotActive {
                        id: session.id,
                        status: session.status,
                    });
                }
                Ok(())
            }
            status => Err(EngineError::SessionNotActive {
                id: session.id,
                status,
            }),
        }
    }

    /// Start a new session: validate stake, claim the player's session slot,
    /// debit and lock the stake, snapshot config, commit a server seed.
    pub fn start_session(
        &self,
        player_id: &str,
        stake_minor: i64,
        currency_code: &str,
        client_seed: Option<String>,
    ) -> EngineResult<StartReceipt> {
        let snapshot = self.configs.current_for(currency_code)?;
        if !snapshot.is_active() {
            return Err(EngineError::ConfigInactive(snapshot.id));
        }
        if stake_minor < snapshot.config.min_stake_minor {
            return Err(EngineError::StakeBelowMinimum {
                stake: stake_minor,
                min_stake: snapshot.config.min_stake_minor,
            });
        }

        let session_id = Uuid::new_v4();
        self.guard.try_acquire(player_id, session_id)?;

        if let Err(e) = self
            .ledger
            .debit_stake(player_id, currency_code, stake_minor, session_id)
        {
            self.guard.release(player_id, session_id);
            return Err(e);
        }

        let commit = fairness::commit();
        let override_mode = self.guard.take_for_session(player_id);
        let now = Utc::now();
        let session = Session {
            id: session_id,
            player_id: player_id.to_string(),
            currency_code: currency_code.to_string(),
            stake_minor,
            server_seed: commit.server_seed,
            server_seed_hash: commit.server_seed_hash.clone(),
            client_seed: client_seed.unwrap_or_default(),
            snapshot,
            draw_count: 0,
            cashout_balance_minor: 0,
            status: SessionStatus::Active,
            started_at: now,
            last_action_at: now,
            ended_at: None,
            override_mode,
            draws: Vec::new(),
        };
        self.persist(&session);
        self.events.publish(GameEvent::SessionStarted {
            session_id,
            player_id: session.player_id.clone(),
            currency_code: session.currency_code.clone(),
            stake_minor,
        });
        tracing::info!(
            session_id = %session_id,
            player_id = %player_id,
            stake = stake_minor,
            "session started"
        );
        self.sessions.insert(session_id, Arc::new(Mutex::new(session)));
        self.with_stats(|stats| {
            stats.sessions_started += 1;
            stats.total_staked_minor += stake_minor;
        });

        Ok(StartReceipt {
            session_id,
            server_seed_hash: commit.server_seed_hash,
            stake_minor,
        })
    }

    fn effective_zero_probability(&self, session: &Session, draw_index: u32) -> f64 {
        let config = &session.snapshot.config;
        match session.override_mode {
            None | Some(OverrideMode::Normal) => risk::zero_probability(draw_index, config),
            Some(OverrideMode::AlwaysWin) => 0.0,
            Some(OverrideMode::AlwaysLose) => 1.0,
            Some(OverrideMode::ForceZeroAtDraw { draw_index: forced }) => {
                if draw_index == forced {
                    1.0
                } else {
                    risk::zero_probability(draw_index, config)
                }
            }
            Some(OverrideMode::FixedProbability { probability }) => probability.clamp(0.0, 1.0),
            Some(OverrideMode::WinStreakThenLose { wins }) => {
                if draw_index > wins {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Resolve one draw. On zero the session ends and the locked stake is
    /// consumed; otherwise the payout accrues to the in-session cashout
    /// balance.
    pub fn draw(&self, session_id: Uuid) -> EngineResult<DrawReport> {
        let handle = self.session_handle(session_id)?;
        let mut session = Self::lock_session(&handle)?;
        self.ensure_playable(&mut session)?;

        let draw_index = session.draw_count + 1;
        let roll = fairness::roll(
            &session.server_seed,
            &session.id,
            draw_index,
            &session.client_seed,
        );
        let zero_probability = self.effective_zero_probability(&session, draw_index);
        let resolution = payout::resolve(
            roll,
            zero_probability,
            &session.snapshot.payout_table,
            session.stake_minor,
        );
        let now = Utc::now();

        match resolution {
            Resolution::Zero => {
                // Wallet mutation first: if the lock release fails nothing
                // else is committed and the call can be safely retried.
                self.ledger.release_stake(
                    &session.player_id,
                    &session.currency_code,
                    session.stake_minor,
                )?;
                let record = DrawRecord {
                    session_id,
                    draw_index,
                    roll,
                    zero_probability,
                    outcome: DrawOutcome::Zero,
                    payout_minor: 0,
                    cashout_balance_after: session.cashout_balance_minor,
                    created_at: now,
                };
                session.draw_count = draw_index;
                session.status = SessionStatus::Lost;
                session.last_action_at = now;
                session.ended_at = Some(now);
                session.draws.push(record.clone());
                self.guard.release(&session.player_id, session.id);
                self.persist_settlement(&session, &record);
                self.with_stats(|stats| stats.sessions_lost += 1);
                self.events.publish(GameEvent::DrawResolved {
                    session_id,
                    draw_index,
                    is_zero: true,
                    payout_minor: 0,
                    cashout_balance_minor: session.cashout_balance_minor,
                });
                self.events.publish(GameEvent::SessionLost {
                    session_id,
                    player_id: session.player_id.clone(),
                    draw_index,
                });
                tracing::info!(session_id = %session_id, draw_index, "zero drawn, session lost");

                Ok(DrawReport {
                    session_id,
                    draw_index,
                    is_zero: true,
                    denomination_value_minor: None,
                    payout_minor: None,
                    cashout_balance_minor: session.cashout_balance_minor,
                })
            }
            Resolution::Payout {
                denomination_id,
                value_minor,
                payout_minor,
            } => {
                let new_balance = session.cashout_balance_minor + payout_minor;
                let record = DrawRecord {
                    session_id,
                    draw_index,
                    roll,
                    zero_probability,
                    outcome: DrawOutcome::Denomination {
                        id: denomination_id,
                    },
                    payout_minor,
                    cashout_balance_after: new_balance,
                    created_at: now,
                };
                session.cashout_balance_minor = new_balance;
                session.draw_count = draw_index;
                session.last_action_at = now;
                session.draws.push(record.clone());
                self.persist_draw(&record);
                self.events.publish(GameEvent::DrawResolved {
                    session_id,
                    draw_index,
                    is_zero: false,
                    payout_minor,
                    cashout_balance_minor: new_balance,
                });

                Ok(DrawReport {
                    session_id,
                    draw_index,
                    is_zero: false,
                    denomination_value_minor: Some(value_minor),
                    payout_minor: Some(payout_minor),
                    cashout_balance_minor: new_balance,
                })
            }
        }
    }

    /// Cash out accumulated winnings. The credited amount is clamped (not
    /// rejected) at the snapshot's `max_cashout_minor`; the locked stake is
    /// consumed in the same wallet mutation.
    pub fn cashout(&self, session_id: Uuid) -> EngineResult<CashoutReceipt> {
        let handle = self.session_handle(session_id)?;
        let mut session = Self::lock_session(&handle)?;
        self.ensure_playable(&mut session)?;

        let required = session.snapshot.config.min_draws_before_cashout;
        if session.draw_count < required {
            return Err(EngineError::CashoutBelowMinDraws {
                completed: session.draw_count,
                required,
            });
        }

        let credited = session
            .cashout_balance_minor
            .min(session.snapshot.config.max_cashout_minor);
        self.ledger.settle_cashout(
            &session.player_id,
            &session.currency_code,
            credited,
            session.stake_minor,
            session.id,
        )?;

        let now = Utc::now();
        session.status = SessionStatus::CashedOut;
        session.last_action_at = now;
        session.ended_at = Some(now);
        self.guard.release(&session.player_id, session.id);
        self.persist(&session);
        self.with_stats(|stats| {
            stats.sessions_cashed_out += 1;
            stats.total_paid_out_minor += credited;
        });
        self.events.publish(GameEvent::CashedOut {
            session_id,
            player_id: session.player_id.clone(),
            credited_minor: credited,
        });
        tracing::info!(session_id = %session_id, credited, "session cashed out");

        Ok(CashoutReceipt {
            session_id,
            credited_minor: credited,
        })
    }

    /// Pause the session. The fee comes out of the in-session cashout
    /// balance, never the wallet.
    pub fn pause(&self, session_id: Uuid) -> EngineResult<PauseReceipt> {
        let handle = self.session_handle(session_id)?;
        let mut session = Self::lock_session(&handle)?;
        self.ensure_playable(&mut session)?;

        let fee = percent_of(
            session.cashout_balance_minor,
            session.snapshot.config.pause_cost_percent,
        );
        session.cashout_balance_minor -= fee;
        session.status = SessionStatus::Paused;
        session.last_action_at = Utc::now();
        self.persist(&session);
        self.events.publish(GameEvent::SessionPaused {
            session_id,
            fee_minor: fee,
        });

        Ok(PauseReceipt {
            session_id,
            fee_charged_minor: fee,
            remaining_balance_minor: session.cashout_balance_minor,
        })
    }

    /// Resume a paused session. The session deadline keeps running while
    /// paused; resuming an overdue session expires it instead.
    pub fn resume(&self, session_id: Uuid) -> EngineResult<()> {
        let handle = self.session_handle(session_id)?;
        let mut session = Self::lock_session(&handle)?;
        match session.status {
            SessionStatus::Paused => {
                if self.is_overdue(&session) {
                    self.force_expire(&mut session)?;
                    return Err(EngineError::SessionNotActive {
                        id: session.id,
                        status: session.status,
                    });
                }
                session.status = SessionStatus::Active;
                session.last_action_at = Utc::now();
                self.persist(&session);
                self.events.publish(GameEvent::SessionResumed { session_id });
                Ok(())
            }
            status => Err(EngineError::SessionNotActive {
                id: session.id,
                status,
            }),
        }
    }

    /// Read-only snapshot of the session. Settled sessions evicted from the
    /// hot map are served from the audit store.
    pub fn get_state(&self, session_id: Uuid) -> EngineResult<SessionView> {
        if let Ok(handle) = self.session_handle(session_id) {
            let session = Self::lock_session(&handle)?;
            return Ok(SessionView {
                id: session.id,
                player_id: session.player_id.clone(),
                currency_code: session.currency_code.clone(),
                stake_minor: session.stake_minor,
                server_seed_hash: session.server_seed_hash.clone(),
                client_seed: session.client_seed.clone(),
                snapshot_id: session.snapshot.id,
                draw_count: session.draw_count,
                cashout_balance_minor: session.cashout_balance_minor,
                status: session.status,
                started_at: session.started_at,
                last_action_at: session.last_action_at,
                ended_at: session.ended_at,
            });
        }

        let record = self
            .store
            .load_session(&session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        Ok(SessionView {
            id: record.id,
            player_id: record.player_id,
            currency_code: record.currency_code,
            stake_minor: record.stake_minor,
            server_seed_hash: record.server_seed_hash,
            client_seed: record.client_seed,
            snapshot_id: record.snapshot_id,
            draw_count: record.draw_count,
            cashout_balance_minor: record.cashout_balance_minor,
            status: record.status,
            started_at: record.started_at,
            last_action_at: record.ended_at.unwrap_or(record.started_at),
            ended_at: record.ended_at,
        })
    }

    /// Reveal the server seed and draw history of a terminal session so the
    /// player can recompute every roll independently. Works for evicted
    /// sessions too, by reading the audit store.
    pub fn verify_session(&self, session_id: Uuid) -> EngineResult<VerificationBundle> {
        if let Ok(handle) = self.session_handle(session_id) {
            let session = Self::lock_session(&handle)?;
            if !session.status.is_terminal() {
                return Err(EngineError::SessionNotSettled(session_id));
            }
            return Ok(VerificationBundle {
                session_id,
                server_seed: session.server_seed.clone(),
                server_seed_hash: session.server_seed_hash.clone(),
                client_seed: session.client_seed.clone(),
                stake_minor: session.stake_minor,
                snapshot_id: session.snapshot.id,
                draws: session.draws.clone(),
            });
        }

        let record = self
            .store
            .load_session(&session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let server_seed = record
            .server_seed
            .ok_or(EngineError::SessionNotSettled(session_id))?;
        let draws = self.store.load_draws(&session_id)?;
        Ok(VerificationBundle {
            session_id,
            server_seed,
            server_seed_hash: record.server_seed_hash,
            client_seed: record.client_seed,
            stake_minor: record.stake_minor,
            snapshot_id: record.snapshot_id,
            draws,
        })
    }

    /// Expire every overdue non-terminal session. Idempotent and safe to run
    /// concurrently with player actions: whoever takes the session lock
    /// first wins, the loser observes a terminal status.
    pub fn expire_overdue(&self) -> usize {
        let handles: Vec<Arc<Mutex<Session>>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut expired = 0;
        for handle in handles {
            let mut session = match handle.lock() {
                Ok(session) => session,
                Err(_) => continue,
            };
            let non_terminal = matches!(
                session.status,
                SessionStatus::Active | SessionStatus::Paused
            );
            if non_terminal && self.is_overdue(&session) {
                match self.force_expire(&mut session) {
                    Ok(()) => expired += 1,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, "expiry failed: {}", e)
                    }
                }
            }
        }
        expired
    }

    /// Drop settled sessions from the hot map once their terminal record is
    /// durable in the audit store; `get_state`/`verify_session` keep working
    /// through the store. Sessions whose terminal write failed are retained
    /// so nothing becomes unreadable.
    pub fn evict_settled(&self) -> usize {
        let settled: Vec<Uuid> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value().lock().ok()?;
                session.status.is_terminal().then_some(session.id)
            })
            .collect();

        let mut evicted = 0;
        for session_id in settled {
            let durable = matches!(
                self.store.load_session(&session_id),
                Ok(Some(record)) if record.status.is_terminal()
            );
            if durable {
                self.sessions.remove(&session_id);
                evicted += 1;
            }
        }
        evicted
    }

    #[cfg(test)]
    pub(crate) fn backdate_session(&self, session_id: Uuid, seconds: i64) {
        if let Some(entry) = self.sessions.get(&session_id) {
            if let Ok(mut session) = entry.value().lock() {
                session.started_at = session.started_at - chrono::Duration::seconds(seconds);
            }
        }
    }
}
