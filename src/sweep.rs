//! Background expiry sweep.
//!
//! Player actions already force-expire overdue sessions on contact; the
//! sweep covers abandoned sessions nobody touches again, so locked stakes
//! are eventually consumed and session slots freed. Each pass also drops
//! settled sessions from the hot map once their audit record is durable,
//! keeping the map bounded by live play.

use crate::session::SessionEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct ExpirySweeper {
    engine: Arc<SessionEngine>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<SessionEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the sweep loop. Returns the task handle; the loop exits after
    /// [`stop`](Self::stop).
    pub fn start(&self) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let engine = self.engine.clone();
        let running = self.running.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh engine
            // is not swept before it has any sessions.
            ticker.tick().await;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let expired = engine.expire_overdue();
                let evicted = engine.evict_settled();
                if expired > 0 || evicted > 0 {
                    tracing::info!(expired, evicted, "expiry sweep completed");
                }
            }
            tracing::info!("expiry sweeper stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigRegistry, EngineConfig};
    use crate::guard::AntiAbuseGuard;
    use crate::store::AuditStore;
    use crate::types::SessionStatus;
    use crate::wallet::WalletLedger;
    use tempfile::TempDir;

    fn engine() -> (Arc<SessionEngine>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AuditStore::open(dir.path()).unwrap());
        let registry =
            Arc::new(ConfigRegistry::bootstrap(store.clone(), &EngineConfig::default()).unwrap());
        let ledger = Arc::new(WalletLedger::new(store.clone()));
        let guard = Arc::new(AntiAbuseGuard::new());
        (
            Arc::new(SessionEngine::new(registry, ledger, guard, store)),
            dir,
        )
    }

    #[tokio::test]
    async fn test_sweeper_expires_abandoned_session() {
        let (engine, _dir) = engine();
        engine.ledger().deposit("p1", "USD", 100, "dep").unwrap();
        let receipt = engine.start_session("p1", 100, "USD", None).unwrap();
        engine.backdate_session(receipt.session_id, 2 * 3600);

        let sweeper = ExpirySweeper::new(engine.clone(), Duration::from_millis(10));
        let handle = sweeper.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.stop();
        handle.await.unwrap();

        let view = engine.get_state(receipt.session_id).unwrap();
        assert_eq!(view.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_stop_terminates_loop() {
        let (engine, _dir) = engine();
        let sweeper = ExpirySweeper::new(engine, Duration::from_millis(10));
        let handle = sweeper.start();
        sweeper.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
