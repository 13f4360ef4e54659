//! Game configuration: tunable parameters, the TOML/env loader, and the
//! immutable per-session snapshot registry.
//!
//! Mutating the live configuration must never change the odds of an
//! in-flight session, so sessions capture an immutable [`ConfigSnapshot`]
//! (parameters plus the denomination set) at start and resolve every draw
//! against it. Unknown fields are a load error: every accepted parameter is
//! consumed by an explicit computation, none exist for display.

use crate::errors::{EngineError, EngineResult};
use crate::payout::PayoutTable;
use crate::risk::MAX_ZERO_PROBABILITY;
use crate::store::{AuditStore, SnapshotRecord};
use crate::types::{Currency, Denomination};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Tunable game parameters. Every field is read by the engine; validation
/// rejects anything out of range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GameConfig {
    /// Smallest stake accepted at session start, in minor units.
    pub min_stake_minor: i64,
    /// Cashout credits are clamped (not rejected) at this amount.
    pub max_cashout_minor: i64,
    /// Pause fee as a percentage of the in-session cashout balance.
    pub pause_cost_percent: u32,
    /// Base rate of the zero-probability curve.
    pub zero_base_rate: f64,
    /// Exponential growth rate of the zero-probability curve.
    pub zero_growth_rate: f64,
    /// Number of guaranteed-safe draws at the start of a session.
    pub min_draws_before_zero: u32,
    /// Draws required before cashout is allowed (closes the stake-and-run
    /// exploit on the guaranteed-safe draws).
    pub min_draws_before_cashout: u32,
    /// Sessions older than this are force-expired by the sweep.
    pub max_session_duration_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_stake_minor: 100,
            max_cashout_minor: 10_000_000,
            pause_cost_percent: 5,
            zero_base_rate: 0.05,
            zero_growth_rate: 0.15,
            min_draws_before_zero: 2,
            min_draws_before_cashout: 2,
            max_session_duration_secs: 3600,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_stake_minor <= 0 {
            return Err(EngineError::Config(
                "min_stake_minor must be positive".to_string(),
            ));
        }
        if self.max_cashout_minor <= 0 {
            return Err(EngineError::Config(
                "max_cashout_minor must be positive".to_string(),
            ));
        }
        if self.pause_cost_percent > 100 {
            return Err(EngineError::Config(format!(
                "pause_cost_percent must be at most 100, got {}",
                self.pause_cost_percent
            )));
        }
        if !self.zero_base_rate.is_finite()
            || !(0.0..MAX_ZERO_PROBABILITY).contains(&self.zero_base_rate)
        {
            return Err(EngineError::Config(format!(
                "zero_base_rate must be in [0, {}), got {}",
                MAX_ZERO_PROBABILITY, self.zero_base_rate
            )));
        }
        if !self.zero_growth_rate.is_finite() || self.zero_growth_rate <= 0.0 {
            return Err(EngineError::Config(format!(
                "zero_growth_rate must be positive, got {}",
                self.zero_growth_rate
            )));
        }
        if self.max_session_duration_secs == 0 {
            return Err(EngineError::Config(
                "max_session_duration_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One denomination row in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenominationEntry {
    pub currency: String,
    pub value_minor: i64,
    pub payout_multiplier_percent: u32,
    pub weight: u32,
    #[serde(default)]
    pub is_zero: bool,
}

/// Full engine configuration as loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub game: GameConfig,
    pub denominations: Vec<DenominationEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            denominations: vec![
                DenominationEntry {
                    currency: "USD".to_string(),
                    value_minor: 0,
                    payout_multiplier_percent: 0,
                    weight: 0,
                    is_zero: true,
                },
                DenominationEntry {
                    currency: "USD".to_string(),
                    value_minor: 5,
                    payout_multiplier_percent: 5,
                    weight: 40,
                    is_zero: false,
                },
                DenominationEntry {
                    currency: "USD".to_string(),
                    value_minor: 10,
                    payout_multiplier_percent: 8,
                    weight: 30,
                    is_zero: false,
                },
                DenominationEntry {
                    currency: "USD".to_string(),
                    value_minor: 25,
                    payout_multiplier_percent: 15,
                    weight: 20,
                    is_zero: false,
                },
                DenominationEntry {
                    currency: "USD".to_string(),
                    value_minor: 100,
                    payout_multiplier_percent: 50,
                    weight: 9,
                    is_zero: false,
                },
                DenominationEntry {
                    currency: "USD".to_string(),
                    value_minor: 500,
                    payout_multiplier_percent: 200,
                    weight: 1,
                    is_zero: false,
                },
            ],
        }
    }
}

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables.
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.game.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> EngineResult<T> {
            value.parse().map_err(|_| {
                EngineError::Config(format!("invalid value for {}: '{}'", name, value))
            })
        }

        let game = &mut config.game;
        if let Ok(v) = env::var("FLIPCORE_MIN_STAKE_MINOR") {
            game.min_stake_minor = parse("FLIPCORE_MIN_STAKE_MINOR", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_MAX_CASHOUT_MINOR") {
            game.max_cashout_minor = parse("FLIPCORE_MAX_CASHOUT_MINOR", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_PAUSE_COST_PERCENT") {
            game.pause_cost_percent = parse("FLIPCORE_PAUSE_COST_PERCENT", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_ZERO_BASE_RATE") {
            game.zero_base_rate = parse("FLIPCORE_ZERO_BASE_RATE", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_ZERO_GROWTH_RATE") {
            game.zero_growth_rate = parse("FLIPCORE_ZERO_GROWTH_RATE", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_MIN_DRAWS_BEFORE_ZERO") {
            game.min_draws_before_zero = parse("FLIPCORE_MIN_DRAWS_BEFORE_ZERO", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_MIN_DRAWS_BEFORE_CASHOUT") {
            game.min_draws_before_cashout = parse("FLIPCORE_MIN_DRAWS_BEFORE_CASHOUT", v)?;
        }
        if let Ok(v) = env::var("FLIPCORE_MAX_SESSION_DURATION_SECS") {
            game.max_session_duration_secs = parse("FLIPCORE_MAX_SESSION_DURATION_SECS", v)?;
        }

        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("failed to write {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, versioned copy of the parameters a session plays against.
/// Captured at session start; retiring the live snapshot never affects
/// sessions already holding it.
pub struct ConfigSnapshot {
    pub id: Uuid,
    pub currency: Currency,
    pub config: GameConfig,
    pub denominations: Vec<Denomination>,
    pub payout_table: PayoutTable,
    pub created_at: DateTime<Utc>,
    active: AtomicBool,
}

impl ConfigSnapshot {
    /// Whether new sessions may still start against this snapshot.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn retire(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Registry of published snapshots plus the current snapshot per currency.
pub struct ConfigRegistry {
    snapshots: DashMap<Uuid, Arc<ConfigSnapshot>>,
    current: DashMap<String, Uuid>,
    store: Arc<AuditStore>,
}

impl ConfigRegistry {
    pub fn new(store: Arc<AuditStore>) -> Self {
        Self {
            snapshots: DashMap::new(),
            current: DashMap::new(),
            store,
        }
    }

    /// Build a registry from a loaded [`EngineConfig`], publishing one
    /// snapshot per currency that appears in the denomination list.
    pub fn bootstrap(store: Arc<AuditStore>, config: &EngineConfig) -> EngineResult<Self> {
        let registry = Self::new(store);

        let mut by_currency: BTreeMap<String, Vec<Denomination>> = BTreeMap::new();
        for entry in &config.denominations {
            let denomination = if entry.is_zero {
                Denomination::zero(&entry.currency)
            } else {
                Denomination::paying(
                    &entry.currency,
                    entry.value_minor,
                    entry.payout_multiplier_percent,
                    entry.weight,
                )
            };
            by_currency
                .entry(entry.currency.clone())
                .or_default()
                .push(denomination);
        }

        if by_currency.is_empty() {
            return Err(EngineError::Config(
                "configuration defines no denominations".to_string(),
            ));
        }

        for (code, denominations) in by_currency {
            registry.publish(Currency::from_code(&code), config.game.clone(), denominations)?;
        }

        Ok(registry)
    }

    /// Validate and publish a new snapshot, making it current for its
    /// currency. The previous current snapshot is retired for new sessions.
    pub fn publish(
        &self,
        currency: Currency,
        config: GameConfig,
        denominations: Vec<Denomination>,
    ) -> EngineResult<Arc<ConfigSnapshot>> {
        config.validate()?;
        let payout_table = PayoutTable::build(&denominations)?;

        let snapshot = Arc::new(ConfigSnapshot {
            id: Uuid::new_v4(),
            currency,
            config,
            denominations,
            payout_table,
            created_at: Utc::now(),
            active: AtomicBool::new(true),
        });

        self.store.store_snapshot(&SnapshotRecord {
            id: snapshot.id,
            currency: snapshot.currency.clone(),
            config: snapshot.config.clone(),
            denominations: snapshot.denominations.clone(),
            created_at: snapshot.created_at,
        })?;

        if let Some(previous) = self
            .current
            .insert(snapshot.currency.code.clone(), snapshot.id)
        {
            if let Some(old) = self.snapshots.get(&previous) {
                old.retire();
            }
        }
        self.snapshots.insert(snapshot.id, snapshot.clone());

        tracing::info!(
            snapshot_id = %snapshot.id,
            currency = %snapshot.currency.code,
            "published config snapshot"
        );

        Ok(snapshot)
    }

    /// The current snapshot for a currency.
    pub fn current_for(&self, currency_code: &str) -> EngineResult<Arc<ConfigSnapshot>> {
        let id = self
            .current
            .get(currency_code)
            .map(|entry| *entry.value())
            .ok_or_else(|| EngineError::UnknownCurrency(currency_code.to_string()))?;
        self.snapshots
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownCurrency(currency_code.to_string()))
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<ConfigSnapshot>> {
        self.snapshots.get(id).map(|entry| entry.value().clone())
    }

    /// Retire a snapshot so no new session can start against it. Sessions
    /// already holding it keep running on their captured copy.
    pub fn retire(&self, id: &Uuid) -> bool {
        match self.snapshots.get(id) {
            Some(snapshot) => {
                snapshot.retire();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (Arc<AuditStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        (Arc::new(AuditStore::open(dir.path()).unwrap()), dir)
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = GameConfig::default();
        config.zero_base_rate = 0.97;
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.zero_growth_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.pause_cost_percent = 101;
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.min_stake_minor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let toml_text = r#"
            [game]
            min_stake_minor = 100
            max_cashout_minor = 1000000
            pause_cost_percent = 5
            zero_base_rate = 0.05
            zero_growth_rate = 0.15
            min_draws_before_zero = 2
            min_draws_before_cashout = 2
            max_session_duration_secs = 3600
            house_edge_percent = 5.0
        "#;
        let result: Result<EngineConfig, _> = toml::from_str(toml_text);
        assert!(result.is_err(), "decorative config fields must be rejected");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flipcore.toml");
        let path_str = path.to_str().unwrap();

        let original = EngineConfig::default();
        let loader = ConfigLoader::new();
        loader.save(&original, path_str).unwrap();

        let loaded = ConfigLoader::new().with_path(path_str).load().unwrap();
        assert_eq!(loaded.game, original.game);
        assert_eq!(loaded.denominations.len(), original.denominations.len());
    }

    #[test]
    fn test_bootstrap_publishes_per_currency() {
        let (store, _dir) = temp_store();
        let registry = ConfigRegistry::bootstrap(store, &EngineConfig::default()).unwrap();
        let snapshot = registry.current_for("USD").unwrap();
        assert!(snapshot.is_active());
        assert!(registry.current_for("EUR").is_err());
    }

    #[test]
    fn test_publish_retires_previous_snapshot() {
        let (store, _dir) = temp_store();
        let registry = ConfigRegistry::bootstrap(store, &EngineConfig::default()).unwrap();
        let first = registry.current_for("USD").unwrap();

        let second = registry
            .publish(
                Currency::usd(),
                GameConfig::default(),
                vec![
                    Denomination::zero("USD"),
                    Denomination::paying("USD", 10, 8, 1),
                ],
            )
            .unwrap();

        assert!(!first.is_active(), "previous snapshot must be retired");
        assert!(second.is_active());
        assert_eq!(registry.current_for("USD").unwrap().id, second.id);
        // The retired snapshot is still resolvable for in-flight sessions.
        assert!(registry.get(&first.id).is_some());
    }

    #[test]
    fn test_snapshot_persisted_for_verifier() {
        let (store, _dir) = temp_store();
        let registry = ConfigRegistry::bootstrap(store.clone(), &EngineConfig::default()).unwrap();
        let snapshot = registry.current_for("USD").unwrap();
        let record = store.load_snapshot(&snapshot.id).unwrap().unwrap();
        assert_eq!(record.currency.code, "USD");
        assert_eq!(record.denominations.len(), snapshot.denominations.len());
    }
}
