//! Player wallet ledger: balances, stake locks, and an append-only
//! transaction log.
//!
//! Money model: `balance_minor` is everything the player holds, including the
//! locked portion; `locked_minor` is the part reserved by an active stake;
//! spendable = balance − locked. A stake lock moves funds from spendable to
//! locked; consuming the lock (loss, expiry, or cashout settlement) removes
//! the locked amount from the wallet entirely. Transaction rows track the
//! spendable balance, so `balance_after == balance_before + amount` holds for
//! every row.
//!
//! Concurrent operations against one wallet serialize on a per-wallet mutex;
//! two operations can never both read the same balance and produce an
//! inconsistent `balance_after`.

use crate::errors::{EngineError, EngineResult};
use crate::store::AuditStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Ledger entry type tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Stake,
    Cashout,
    AdminAdjustment,
}

/// Append-only ledger entry. `balance_before`/`balance_after` track the
/// spendable balance at the time of the write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub amount_minor: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub reference: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Read-only snapshot of a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletView {
    pub wallet_id: Uuid,
    pub player_id: String,
    pub currency_code: String,
    pub balance_minor: i64,
    pub locked_minor: i64,
    pub available_minor: i64,
}

struct WalletAccount {
    id: Uuid,
    player_id: String,
    currency_code: String,
    balance_minor: i64,
    locked_minor: i64,
    transactions: Vec<WalletTransaction>,
    references: HashSet<String>,
    seq: u64,
}

impl WalletAccount {
    fn available(&self) -> i64 {
        self.balance_minor - self.locked_minor
    }
}

/// In-process wallet ledger keyed by `(player, currency)`.
pub struct WalletLedger {
    wallets: DashMap<(String, String), Arc<Mutex<WalletAccount>>>,
    store: Arc<AuditStore>,
}

impl WalletLedger {
    pub fn new(store: Arc<AuditStore>) -> Self {
        Self {
            wallets: DashMap::new(),
            store,
        }
    }

    fn account(&self, player_id: &str, currency_code: &str) -> Arc<Mutex<WalletAccount>> {
        self.wallets
            .entry((player_id.to_string(), currency_code.to_string()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(WalletAccount {
                    id: Uuid::new_v4(),
                    player_id: player_id.to_string(),
                    currency_code: currency_code.to_string(),
                    balance_minor: 0,
                    locked_minor: 0,
                    transactions: Vec::new(),
                    references: HashSet::new(),
                    seq: 0,
                }))
            })
            .value()
            .clone()
    }

    fn lock_account<'a>(
        handle: &'a Arc<Mutex<WalletAccount>>,
    ) -> EngineResult<MutexGuard<'a, WalletAccount>> {
        handle
            .lock()
            .map_err(|_| EngineError::LedgerIntegrity("wallet lock poisoned".to_string()))
    }

    /// Append a transaction row for an already-validated mutation. Persists
    /// the row first so a storage failure leaves the wallet untouched.
    fn append(
        &self,
        account: &mut WalletAccount,
        kind: TransactionKind,
        amount_minor: i64,
        balance_delta: i64,
        locked_delta: i64,
        reference: String,
        metadata: serde_json::Value,
    ) -> EngineResult<WalletTransaction> {
        if account.references.contains(&reference) {
            return Err(EngineError::LedgerIntegrity(format!(
                "duplicate transaction reference '{}'",
                reference
            )));
        }

        let before = account.available();
        let after = before + amount_minor;
        let new_balance = account.balance_minor + balance_delta;
        let new_locked = account.locked_minor + locked_delta;
        if new_locked < 0 || new_locked > new_balance || after != new_balance - new_locked {
            return Err(EngineError::LedgerIntegrity(format!(
                "wallet {} mutation breaks invariants (balance {}, locked {})",
                account.id, new_balance, new_locked
            )));
        }

        let tx = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: account.id,
            amount_minor,
            balance_before: before,
            balance_after: after,
            kind,
            reference,
            metadata,
            created_at: Utc::now(),
        };

        let seq = account.seq + 1;
        self.store.store_wallet_tx(seq, &tx)?;

        account.seq = seq;
        account.balance_minor = new_balance;
        account.locked_minor = new_locked;
        account.references.insert(tx.reference.clone());
        account.transactions.push(tx.clone());

        tracing::debug!(
            wallet_id = %account.id,
            kind = ?tx.kind,
            amount = amount_minor,
            balance_after = after,
            "ledger write"
        );

        Ok(tx)
    }

    /// Credit external funds into the wallet.
    pub fn deposit(
        &self,
        player_id: &str,
        currency_code: &str,
        amount_minor: i64,
        reference: &str,
    ) -> EngineResult<WalletTransaction> {
        if amount_minor <= 0 {
            return Err(EngineError::LedgerIntegrity(
                "deposit amount must be positive".to_string(),
            ));
        }
        let handle = self.account(player_id, currency_code);
        let mut account = Self::lock_account(&handle)?;
        self.append(
            &mut account,
            TransactionKind::Deposit,
            amount_minor,
            amount_minor,
            0,
            reference.to_string(),
            serde_json::json!({}),
        )
    }

    /// Direct debit of spendable funds.
    pub fn withdraw(
        &self,
        player_id: &str,
        currency_code: &str,
        amount_minor: i64,
        reference: &str,
    ) -> EngineResult<WalletTransaction> {
        if amount_minor <= 0 {
            return Err(EngineError::LedgerIntegrity(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        let handle = self.account(player_id, currency_code);
        let mut account = Self::lock_account(&handle)?;
        if amount_minor > account.available() {
            return Err(EngineError::InsufficientFunds {
                requested: amount_minor,
                available: account.available(),
            });
        }
        self.append(
            &mut account,
            TransactionKind::Withdrawal,
            -amount_minor,
            -amount_minor,
            0,
            reference.to_string(),
            serde_json::json!({}),
        )
    }

    /// Move a stake from spendable into the locked balance.
    pub fn debit_stake(
        &self,
        player_id: &str,
        currency_code: &str,
        amount_minor: i64,
        session_id: Uuid,
    ) -> EngineResult<WalletTransaction> {
        let handle = self.account(player_id, currency_code);
        let mut account = Self::lock_account(&handle)?;
        if amount_minor > account.available() {
            return Err(EngineError::InsufficientFunds {
                requested: amount_minor,
                available: account.available(),
            });
        }
        self.append(
            &mut account,
            TransactionKind::Stake,
            -amount_minor,
            0,
            amount_minor,
            format!("stake:{}", session_id),
            serde_json::json!({ "session_id": session_id }),
        )
    }

    /// Consume a locked stake: the locked amount leaves the wallet without
    /// any credit. No transaction row is written; the stake was already
    /// debited from the spendable balance at session start.
    pub fn release_stake(
        &self,
        player_id: &str,
        currency_code: &str,
        amount_minor: i64,
    ) -> EngineResult<()> {
        let handle = self.account(player_id, currency_code);
        let mut account = Self::lock_account(&handle)?;
        Self::consume_lock(&mut account, amount_minor)
    }

    fn consume_lock(account: &mut WalletAccount, amount_minor: i64) -> EngineResult<()> {
        if amount_minor > account.locked_minor {
            return Err(EngineError::LedgerIntegrity(format!(
                "cannot release {} from wallet {} with locked {}",
                amount_minor, account.id, account.locked_minor
            )));
        }
        account.locked_minor -= amount_minor;
        account.balance_minor -= amount_minor;
        Ok(())
    }

    /// Cashout settlement: consume the locked stake and credit the won
    /// amount in one atomic wallet mutation.
    pub fn settle_cashout(
        &self,
        player_id: &str,
        currency_code: &str,
        credit_minor: i64,
        stake_minor: i64,
        session_id: Uuid,
    ) -> EngineResult<WalletTransaction> {
        let handle = self.account(player_id, currency_code);
        let mut account = Self::lock_account(&handle)?;
        Self::consume_lock(&mut account, stake_minor)?;
        match self.append(
            &mut account,
            TransactionKind::Cashout,
            credit_minor,
            credit_minor,
            0,
            format!("cashout:{}", session_id),
            serde_json::json!({ "session_id": session_id }),
        ) {
            Ok(tx) => Ok(tx),
            Err(e) => {
                // Undo the lock consumption so the failed settlement leaves
                // no partial effect.
                account.locked_minor += stake_minor;
                account.balance_minor += stake_minor;
                Err(e)
            }
        }
    }

    /// Signed manual correction, for support/operations use.
    pub fn admin_adjust(
        &self,
        player_id: &str,
        currency_code: &str,
        amount_minor: i64,
        reference: &str,
        metadata: serde_json::Value,
    ) -> EngineResult<WalletTransaction> {
        let handle = self.account(player_id, currency_code);
        let mut account = Self::lock_account(&handle)?;
        if amount_minor < 0 && -amount_minor > account.available() {
            return Err(EngineError::InsufficientFunds {
                requested: -amount_minor,
                available: account.available(),
            });
        }
        self.append(
            &mut account,
            TransactionKind::AdminAdjustment,
            amount_minor,
            amount_minor,
            0,
            reference.to_string(),
            metadata,
        )
    }

    pub fn view(&self, player_id: &str, currency_code: &str) -> EngineResult<WalletView> {
        let handle = self.account(player_id, currency_code);
        let account = Self::lock_account(&handle)?;
        Ok(WalletView {
            wallet_id: account.id,
            player_id: account.player_id.clone(),
            currency_code: account.currency_code.clone(),
            balance_minor: account.balance_minor,
            locked_minor: account.locked_minor,
            available_minor: account.available(),
        })
    }

    pub fn transactions(
        &self,
        player_id: &str,
        currency_code: &str,
    ) -> EngineResult<Vec<WalletTransaction>> {
        let handle = self.account(player_id, currency_code);
        let account = Self::lock_account(&handle)?;
        Ok(account.transactions.clone())
    }
}
