//! End-to-end engine test: play sessions to settlement, then verify the
//! audit trail survives a restart and still passes fairness verification.

use flipcore::{
    fairness, AntiAbuseGuard, AuditStore, ConfigRegistry, EngineConfig, GameConfig, OverrideMode,
    OverrideScope, PayoutTable, SessionEngine, SessionStatus, SimulationOverride,
    VerificationBundle, WalletLedger,
};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn test_config() -> EngineConfig {
    EngineConfig {
        game: GameConfig {
            min_stake_minor: 100,
            min_draws_before_zero: 2,
            min_draws_before_cashout: 2,
            ..GameConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn build_engine(store: Arc<AuditStore>) -> Arc<SessionEngine> {
    let registry = Arc::new(ConfigRegistry::bootstrap(store.clone(), &test_config()).unwrap());
    let ledger = Arc::new(WalletLedger::new(store.clone()));
    let guard = Arc::new(AntiAbuseGuard::new());
    Arc::new(SessionEngine::new(registry, ledger, guard, store))
}

#[tokio::test]
async fn test_audit_trail_survives_restart() {
    let dir = TempDir::new().unwrap();

    // === PHASE 1: Play one winning and one losing session, then shut down ===
    let (won_session, lost_session) = {
        let store = Arc::new(AuditStore::open(dir.path()).unwrap());
        let engine = build_engine(store);

        engine.ledger().deposit("alice", "USD", 100, "dep-alice").unwrap();
        let won = engine.start_session("alice", 100, "USD", Some("lucky".to_string())).unwrap();
        assert!(!engine.draw(won.session_id).unwrap().is_zero);
        assert!(!engine.draw(won.session_id).unwrap().is_zero);
        let cashout = engine.cashout(won.session_id).unwrap();
        assert!(cashout.credited_minor > 0);

        engine.guard().set_override(SimulationOverride {
            scope: OverrideScope::Player("bob".to_string()),
            mode: OverrideMode::AlwaysLose,
            remaining_uses: 1,
        });
        engine.ledger().deposit("bob", "USD", 100, "dep-bob").unwrap();
        let lost = engine.start_session("bob", 100, "USD", None).unwrap();
        assert!(engine.draw(lost.session_id).unwrap().is_zero);
        assert_eq!(
            engine.get_state(lost.session_id).unwrap().status,
            SessionStatus::Lost
        );

        (won.session_id, lost.session_id)
        // Engine and store drop here, releasing the database lock.
    };

    // === PHASE 2: Reopen the store cold and verify everything on record ===
    let store = AuditStore::open(dir.path()).unwrap();

    for (session_id, expected_status) in [
        (won_session, SessionStatus::CashedOut),
        (lost_session, SessionStatus::Lost),
    ] {
        let record = store.load_session(&session_id).unwrap().unwrap();
        assert_eq!(record.status, expected_status);
        let server_seed = record
            .server_seed
            .clone()
            .expect("terminal session must reveal its seed");

        let snapshot = store.load_snapshot(&record.snapshot_id).unwrap().unwrap();
        let table = PayoutTable::build(&snapshot.denominations).unwrap();

        let draws = store.load_draws(&session_id).unwrap();
        assert_eq!(draws.len(), record.draw_count as usize);

        let bundle = VerificationBundle {
            session_id,
            server_seed,
            server_seed_hash: record.server_seed_hash.clone(),
            client_seed: record.client_seed.clone(),
            stake_minor: record.stake_minor,
            snapshot_id: record.snapshot_id,
            draws,
        };
        fairness::verify_bundle(&bundle, &table).unwrap();
    }

    // A tampered payout on disk must fail verification.
    let record = store.load_session(&won_session).unwrap().unwrap();
    let snapshot = store.load_snapshot(&record.snapshot_id).unwrap().unwrap();
    let table = PayoutTable::build(&snapshot.denominations).unwrap();
    let mut draws = store.load_draws(&won_session).unwrap();
    draws[0].payout_minor += 1_000_000;
    let tampered = VerificationBundle {
        session_id: won_session,
        server_seed: record.server_seed.clone().unwrap(),
        server_seed_hash: record.server_seed_hash.clone(),
        client_seed: record.client_seed.clone(),
        stake_minor: record.stake_minor,
        snapshot_id: record.snapshot_id,
        draws,
    };
    assert!(fairness::verify_bundle(&tampered, &table).is_err());
}

#[tokio::test]
async fn test_wallet_ledger_reconciles_with_audit_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(AuditStore::open(dir.path()).unwrap());
    let engine = build_engine(store.clone());

    engine.ledger().deposit("carol", "USD", 500, "dep-carol").unwrap();
    let receipt = engine.start_session("carol", 100, "USD", None).unwrap();
    engine.draw(receipt.session_id).unwrap();
    engine.draw(receipt.session_id).unwrap();
    engine.cashout(receipt.session_id).unwrap();

    let wallet_id = engine.ledger().view("carol", "USD").unwrap().wallet_id;
    let persisted = store.load_wallet_txs(&wallet_id).unwrap();
    let in_memory = engine.ledger().transactions("carol", "USD").unwrap();
    assert_eq!(persisted.len(), in_memory.len());
    for (on_disk, live) in persisted.iter().zip(in_memory.iter()) {
        assert_eq!(on_disk.id, live.id);
        assert_eq!(on_disk.balance_after, live.balance_after);
    }
    // Every persisted row upholds the ledger invariant.
    for tx in &persisted {
        assert_eq!(tx.balance_after, tx.balance_before + tx.amount_minor);
    }
}

#[tokio::test]
async fn test_unknown_session_and_currency() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(AuditStore::open(dir.path()).unwrap());
    let engine = build_engine(store);

    assert!(engine.draw(Uuid::new_v4()).is_err());
    assert!(engine.get_state(Uuid::new_v4()).is_err());

    engine.ledger().deposit("dave", "EUR", 500, "dep-dave").unwrap();
    assert!(engine.start_session("dave", 100, "EUR", None).is_err());
}
