//! Append-only audit store backed by RocksDB.
//!
//! The authoritative hot state lives in memory; this store is the durable
//! record used for post-hoc fairness verification and ledger reconciliation.
//! Keys are namespaced with ordered big-endian suffixes so draw records and
//! wallet transactions scan back in commit order.

use crate::config::GameConfig;
use crate::errors::EngineResult;
use crate::types::{Currency, Denomination, DrawRecord, SessionStatus};
use crate::wallet::WalletTransaction;
use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const SESSION_PREFIX: &str = "session:";
const DRAW_PREFIX: &str = "draw:";
const WALLET_TX_PREFIX: &str = "wallet:tx:";
const SNAPSHOT_PREFIX: &str = "snapshot:";

/// Durable session summary, written at start and overwritten at the terminal
/// transition (same key; the terminal write adds the revealed seed fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub player_id: String,
    pub currency_code: String,
    pub stake_minor: i64,
    pub server_seed_hash: String,
    /// Present only once the session is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    pub client_seed: String,
    pub snapshot_id: Uuid,
    pub draw_count: u32,
    pub cashout_balance_minor: i64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Durable copy of a published config snapshot, so the offline verifier can
/// rebuild the payout table a session actually played against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: Uuid,
    pub currency: Currency,
    pub config: GameConfig,
    pub denominations: Vec<Denomination>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditStore {
    db: Arc<DB>,
}

fn session_key(id: &Uuid) -> Vec<u8> {
    format!("{}{}", SESSION_PREFIX, id).into_bytes()
}

fn draw_key(session_id: &Uuid, draw_index: u32) -> Vec<u8> {
    let mut key = format!("{}{}:", DRAW_PREFIX, session_id).into_bytes();
    key.extend_from_slice(&draw_index.to_be_bytes());
    key
}

fn wallet_tx_key(wallet_id: &Uuid, seq: u64) -> Vec<u8> {
    let mut key = format!("{}{}:", WALLET_TX_PREFIX, wallet_id).into_bytes();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn snapshot_key(id: &Uuid) -> Vec<u8> {
    format!("{}{}", SNAPSHOT_PREFIX, id).into_bytes()
}

impl AuditStore {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put(key, bytes)?;
        Ok(())
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, key: &[u8]) -> EngineResult<Option<T>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan all values under a key prefix, in key order.
    fn scan_prefix<T: for<'de> Deserialize<'de>>(&self, prefix: &[u8]) -> EngineResult<Vec<T>> {
        let mut values = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    pub fn store_session(&self, record: &SessionRecord) -> EngineResult<()> {
        self.put_json(&session_key(&record.id), record)
    }

    pub fn load_session(&self, id: &Uuid) -> EngineResult<Option<SessionRecord>> {
        self.get_json(&session_key(id))
    }

    /// All persisted sessions, unordered.
    pub fn load_all_sessions(&self) -> EngineResult<Vec<SessionRecord>> {
        self.scan_prefix(SESSION_PREFIX.as_bytes())
    }

    pub fn store_draw(&self, record: &DrawRecord) -> EngineResult<()> {
        self.put_json(&draw_key(&record.session_id, record.draw_index), record)
    }

    /// A session's draw records in draw-index order.
    pub fn load_draws(&self, session_id: &Uuid) -> EngineResult<Vec<DrawRecord>> {
        let prefix = format!("{}{}:", DRAW_PREFIX, session_id).into_bytes();
        self.scan_prefix(&prefix)
    }

    pub fn store_wallet_tx(&self, seq: u64, tx: &WalletTransaction) -> EngineResult<()> {
        self.put_json(&wallet_tx_key(&tx.wallet_id, seq), tx)
    }

    pub fn load_wallet_txs(&self, wallet_id: &Uuid) -> EngineResult<Vec<WalletTransaction>> {
        let prefix = format!("{}{}:", WALLET_TX_PREFIX, wallet_id).into_bytes();
        self.scan_prefix(&prefix)
    }

    pub fn store_snapshot(&self, record: &SnapshotRecord) -> EngineResult<()> {
        self.put_json(&snapshot_key(&record.id), record)
    }

    pub fn load_snapshot(&self, id: &Uuid) -> EngineResult<Option<SnapshotRecord>> {
        self.get_json(&snapshot_key(id))
    }

    /// Persist a terminal draw transition atomically: the final draw record
    /// and the settled session record land in one batch, so the audit trail
    /// never shows a losing draw without its session outcome (or vice versa).
    pub fn store_settlement(
        &self,
        session: &SessionRecord,
        draw: &DrawRecord,
    ) -> EngineResult<()> {
        let items = [
            (session_key(&session.id), serde_json::to_vec(session)?),
            (
                draw_key(&draw.session_id, draw.draw_index),
                serde_json::to_vec(draw)?,
            ),
        ];
        self.batch_write(&items)
    }

    /// Write several records in one atomic batch.
    fn batch_write<K, V>(&self, items: &[(K, V)]) -> EngineResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DrawOutcome;
    use tempfile::TempDir;

    fn open_temp() -> (AuditStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn draw(session_id: Uuid, index: u32) -> DrawRecord {
        DrawRecord {
            session_id,
            draw_index: index,
            roll: 0.42,
            zero_probability: 0.0,
            outcome: DrawOutcome::Zero,
            payout_minor: 0,
            cashout_balance_after: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_round_trip() {
        let (store, _dir) = open_temp();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            player_id: "player-1".to_string(),
            currency_code: "USD".to_string(),
            stake_minor: 100,
            server_seed_hash: "hash".to_string(),
            server_seed: None,
            client_seed: String::new(),
            snapshot_id: Uuid::new_v4(),
            draw_count: 0,
            cashout_balance_minor: 0,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
        };
        store.store_session(&record).unwrap();
        let loaded = store.load_session(&record.id).unwrap().unwrap();
        assert_eq!(loaded.player_id, "player-1");
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[test]
    fn test_draws_scan_in_index_order() {
        let (store, _dir) = open_temp();
        let session_id = Uuid::new_v4();
        // Insert out of order; the big-endian key suffix restores order.
        for index in [3u32, 1, 2, 300, 10] {
            store.store_draw(&draw(session_id, index)).unwrap();
        }
        let draws = store.load_draws(&session_id).unwrap();
        let indexes: Vec<u32> = draws.iter().map(|d| d.draw_index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 10, 300]);
    }

    #[test]
    fn test_settlement_writes_both_records() {
        let (store, _dir) = open_temp();
        let session_id = Uuid::new_v4();
        let record = SessionRecord {
            id: session_id,
            player_id: "player-1".to_string(),
            currency_code: "USD".to_string(),
            stake_minor: 100,
            server_seed_hash: "hash".to_string(),
            server_seed: Some("seed".to_string()),
            client_seed: String::new(),
            snapshot_id: Uuid::new_v4(),
            draw_count: 1,
            cashout_balance_minor: 0,
            status: SessionStatus::Lost,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        };
        store.store_settlement(&record, &draw(session_id, 1)).unwrap();

        let loaded = store.load_session(&session_id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Lost);
        assert_eq!(loaded.server_seed.as_deref(), Some("seed"));
        assert_eq!(store.load_draws(&session_id).unwrap().len(), 1);
    }

    #[test]
    fn test_draw_scan_is_per_session() {
        let (store, _dir) = open_temp();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.store_draw(&draw(a, 1)).unwrap();
        store.store_draw(&draw(b, 1)).unwrap();
        store.store_draw(&draw(b, 2)).unwrap();
        assert_eq!(store.load_draws(&a).unwrap().len(), 1);
        assert_eq!(store.load_draws(&b).unwrap().len(), 2);
    }
}
