//! Configuration management for the circulation engine

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CirculationConfig {
    /// Maximum number of simultaneously active loans per borrower
    pub max_active_loans: usize,
    /// Longest allowed distance between loan date and due date
    pub max_loan_days: i64,
    /// Due date offset used by a plain `borrow`
    pub default_loan_days: i64,
    /// Fine charged per day late, in the smallest currency unit
    pub fine_rate_per_day: i64,
    /// Age after which a queued reservation is expired by the sweeper
    pub reservation_ttl_hours: i64,
    /// Upper bound on waiting for a per-copy, per-borrower or per-book lock
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON file with branches, books and copies loaded at startup
    pub seed_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub circulation: CirculationConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. CIRCULATION__SWEEPER__INTERVAL_SECS=60
            .add_source(
                Environment::with_prefix("CIRCULATION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("catalog.seed_path", env::var("CATALOG_SEED").ok())?
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every plain borrow fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        let circulation = &self.circulation;
        if circulation.default_loan_days < 0 {
            return Err(ConfigError::Message(format!(
                "circulation.default_loan_days must not be negative (got {})",
                circulation.default_loan_days
            )));
        }
        if circulation.default_loan_days > circulation.max_loan_days {
            return Err(ConfigError::Message(format!(
                "circulation.default_loan_days ({}) exceeds circulation.max_loan_days ({})",
                circulation.default_loan_days, circulation.max_loan_days
            )));
        }
        Ok(())
    }
}

impl CirculationConfig {
    pub fn fine_rate(&self) -> Decimal {
        Decimal::from(self.fine_rate_per_day)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reservation_ttl_hours)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            max_active_loans: 3,
            max_loan_days: 14,
            default_loan_days: 14,
            fine_rate_per_day: 1000,
            reservation_ttl_hours: 48,
            lock_timeout_ms: 2000,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
