//! Configuration for the reimbursement ledger

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spend_policy::{AccountId, Amount, DefaultLimits, FeeSchedule};
use std::path::{Path, PathBuf};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Account the treasuries delegate their allowance to
    pub engine_account: String,

    /// Principal holding `Admin` on a fresh ledger
    pub bootstrap_admin: String,

    /// Snapshot directory
    pub data_dir: PathBuf,

    /// Default spend caps
    pub limits: LimitsConfig,

    /// Fee configuration
    pub fees: FeesConfig,

    /// Audit event configuration
    pub events: EventsConfig,

    /// Upper bound on one provider transfer (milliseconds)
    pub transfer_timeout_ms: u64,

    /// `text` or `json`
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "reimbursement-ledger".to_string(),
            engine_account: "reimbursement-engine".to_string(),
            bootstrap_admin: "admin".to_string(),
            data_dir: PathBuf::from("./data/reimbursements"),
            limits: LimitsConfig::default(),
            fees: FeesConfig::default(),
            events: EventsConfig::default(),
            transfer_timeout_ms: 5_000,
            log_format: "text".to_string(),
        }
    }
}

/// Default cap configuration (decimal units)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Default daily cap per recipient
    pub default_daily: Decimal,

    /// Default monthly cap per recipient
    pub default_monthly: Decimal,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_daily: Decimal::from(1_000),    // $1k
            default_monthly: Decimal::from(10_000), // $10k
        }
    }
}

/// Fee configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeesConfig {
    /// Basis points withheld from each reimbursement
    pub fee_bps: u16,

    /// Fee recipient (unset disables fees)
    pub fee_recipient: Option<String>,
}

/// Audit event configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,

    /// Events kept in memory (0 = unbounded)
    pub retain: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
            retain: 10_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(name) = std::env::var("REIMBURSE_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(account) = std::env::var("REIMBURSE_ENGINE_ACCOUNT") {
            config.engine_account = account;
        }
        if let Ok(admin) = std::env::var("REIMBURSE_BOOTSTRAP_ADMIN") {
            config.bootstrap_admin = admin;
        }
        if let Ok(data_dir) = std::env::var("REIMBURSE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(daily) = std::env::var("REIMBURSE_DEFAULT_DAILY") {
            config.limits.default_daily = parse_var("REIMBURSE_DEFAULT_DAILY", &daily)?;
        }
        if let Ok(monthly) = std::env::var("REIMBURSE_DEFAULT_MONTHLY") {
            config.limits.default_monthly = parse_var("REIMBURSE_DEFAULT_MONTHLY", &monthly)?;
        }
        if let Ok(bps) = std::env::var("REIMBURSE_FEE_BPS") {
            config.fees.fee_bps = parse_var("REIMBURSE_FEE_BPS", &bps)?;
        }
        if let Ok(recipient) = std::env::var("REIMBURSE_FEE_RECIPIENT") {
            config.fees.fee_recipient = Some(recipient).filter(|r| !r.trim().is_empty());
        }
        if let Ok(timeout) = std::env::var("REIMBURSE_TRANSFER_TIMEOUT_MS") {
            config.transfer_timeout_ms = parse_var("REIMBURSE_TRANSFER_TIMEOUT_MS", &timeout)?;
        }
        if let Ok(format) = std::env::var("REIMBURSE_LOG_FORMAT") {
            config.log_format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.engine_account.trim().is_empty() {
            return Err(Error::Config("engine_account must be set".to_string()));
        }
        if self.bootstrap_admin.trim().is_empty() {
            return Err(Error::Config("bootstrap_admin must be set".to_string()));
        }
        if self.events.channel_capacity == 0 {
            return Err(Error::Config(
                "events.channel_capacity must be positive".to_string(),
            ));
        }
        if self.transfer_timeout_ms == 0 {
            return Err(Error::Config(
                "transfer_timeout_ms must be positive".to_string(),
            ));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(Error::Config(format!(
                "log_format must be 'text' or 'json', got '{}'",
                self.log_format
            )));
        }
        self.default_limits()?;
        self.fee_schedule()?;
        Ok(())
    }

    /// Engine spender account
    pub fn engine_account(&self) -> AccountId {
        AccountId::new(self.engine_account.clone())
    }

    /// Bootstrap admin principal
    pub fn bootstrap_admin(&self) -> AccountId {
        AccountId::new(self.bootstrap_admin.clone())
    }

    /// Validated default limits
    pub fn default_limits(&self) -> Result<DefaultLimits> {
        let daily = Amount::from_decimal(self.limits.default_daily)?;
        let monthly = Amount::from_decimal(self.limits.default_monthly)?;
        Ok(DefaultLimits::new(daily, monthly)?)
    }

    /// Validated fee schedule
    pub fn fee_schedule(&self) -> Result<FeeSchedule> {
        let recipient = self.fees.fee_recipient.clone().map(AccountId::new);
        Ok(FeeSchedule::new(self.fees.fee_bps, recipient)?)
    }

    /// Snapshot file path
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(crate::storage::SNAPSHOT_FILE)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", name, e)))
}
