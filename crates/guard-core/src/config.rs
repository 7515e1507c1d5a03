//! Configuration for the trading safety core.
//!
//! Loaded once at startup from a YAML/TOML/JSON file with environment overlays,
//! then validated. Nothing here is re-read during the control loop.

use config::{Config as Settings, ConfigBuilder, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{Error, Result};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    pub risk: RiskConfig,
    #[serde(default = "default_starting_capital")]
    pub starting_capital: Decimal,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    /// Maximum drawdown from peak capital, in percent (5 = 5%).
    pub max_drawdown_pct: Decimal,
    /// Maximum rolling-window loss across all strategies.
    pub max_loss_usd: Decimal,
    /// Default per-trade size cap.
    #[serde(default = "default_max_trade_size")]
    pub max_trade_size_usd: Decimal,
    #[serde(default = "default_rolling_window_hours")]
    pub rolling_window_hours: i64,
    /// Step used by trade-size scaling.
    #[serde(default = "default_scale_increment")]
    pub scale_increment_usd: Decimal,
    /// Ceiling for upward trade-size scaling.
    #[serde(default = "default_max_scaled_trade_size")]
    pub max_scaled_trade_size_usd: Decimal,
    #[serde(default)]
    pub per_strategy: BTreeMap<String, StrategyLimits>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: Decimal::new(5, 0),
            max_loss_usd: Decimal::new(200, 0),
            max_trade_size_usd: default_max_trade_size(),
            rolling_window_hours: default_rolling_window_hours(),
            scale_increment_usd: default_scale_increment(),
            max_scaled_trade_size_usd: default_max_scaled_trade_size(),
            per_strategy: BTreeMap::new(),
        }
    }
}

impl RiskConfig {
    pub fn rolling_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rolling_window_hours)
    }

    pub fn limits_for(&self, strategy: &str) -> Option<&StrategyLimits> {
        self.per_strategy.get(strategy)
    }
}

/// Per-strategy overrides. Unset fields fall back to the global values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyLimits {
    pub max_loss_usd: Option<Decimal>,
    pub max_trade_size_usd: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KillSwitchConfig {
    /// Operator-level toggle, independent of tier.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Trade errors before PAUSE; twice this many before HALT.
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_errors: default_max_errors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifierConfig {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub slack_webhook: Option<String>,
    pub email_to: Option<String>,
    pub email_from: Option<String>,
    pub email_api_key: Option<String>,
    #[serde(default = "default_email_api_url")]
    pub email_api_url: String,
    /// Per-channel delivery timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_panic_log_path")]
    pub panic_log_path: PathBuf,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            telegram_chat_id: None,
            slack_webhook: None,
            email_to: None,
            email_from: None,
            email_api_key: None,
            email_api_url: default_email_api_url(),
            timeout_secs: default_timeout_secs(),
            panic_log_path: default_panic_log_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Defaults to the file the configuration was loaded from.
    pub config_path: Option<PathBuf>,
    #[serde(default = "default_secrets_path")]
    pub secrets_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_status_addr")]
    pub status_addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            status_addr: default_status_addr(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_starting_capital() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_max_trade_size() -> Decimal {
    Decimal::new(100, 0)
}

fn default_rolling_window_hours() -> i64 {
    24
}

fn default_scale_increment() -> Decimal {
    Decimal::new(50, 0)
}

fn default_max_scaled_trade_size() -> Decimal {
    Decimal::new(500, 0)
}

fn default_max_errors() -> u32 {
    3
}

fn default_email_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_panic_log_path() -> PathBuf {
    PathBuf::from("PANIC.log")
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from(".env")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_status_addr() -> String {
    "127.0.0.1:8501".to_string()
}

impl GuardConfig {
    /// Load from a file, overlaid by `GUARD__*` and the well-known notifier
    /// environment variables. A `.env` file is honoured if present.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let builder = Settings::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("GUARD").separator("__"));

        let mut config = Self::from_builder(overlay_notifier_env(builder)?)?;
        if config.monitor.config_path.is_none() {
            config.monitor.config_path = Some(path.to_path_buf());
        }
        debug!(path = %path.display(), strategies = config.risk.per_strategy.len(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration text without consulting the environment.
    pub fn parse(text: &str, format: FileFormat) -> Result<Self> {
        Self::from_builder(Settings::builder().add_source(File::from_str(text, format)))
    }

    fn from_builder(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings = builder.build()?;

        let raw: serde_json::Value = settings.clone().try_deserialize()?;
        reject_secret_keys(&raw, "")?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        if risk.max_drawdown_pct <= Decimal::ZERO || risk.max_drawdown_pct >= Decimal::ONE_HUNDRED {
            return Err(Error::config("risk.max_drawdown_pct must be between 0 and 100"));
        }
        if risk.max_loss_usd <= Decimal::ZERO {
            return Err(Error::config("risk.max_loss_usd must be positive"));
        }
        if risk.max_trade_size_usd <= Decimal::ZERO {
            return Err(Error::config("risk.max_trade_size_usd must be positive"));
        }
        if risk.rolling_window_hours <= 0 {
            return Err(Error::config("risk.rolling_window_hours must be positive"));
        }
        if risk.scale_increment_usd <= Decimal::ZERO {
            return Err(Error::config("risk.scale_increment_usd must be positive"));
        }
        if risk.max_scaled_trade_size_usd < risk.max_trade_size_usd {
            return Err(Error::config(
                "risk.max_scaled_trade_size_usd must not be below risk.max_trade_size_usd",
            ));
        }
        for (name, limits) in &risk.per_strategy {
            let non_positive = [limits.max_loss_usd, limits.max_trade_size_usd]
                .into_iter()
                .flatten()
                .any(|v| v <= Decimal::ZERO);
            if non_positive {
                return Err(Error::config(format!(
                    "risk.per_strategy.{name} limits must be positive"
                )));
            }
        }
        if self.starting_capital <= Decimal::ZERO {
            return Err(Error::config("starting_capital must be positive"));
        }
        if self.kill_switch.max_errors == 0 {
            return Err(Error::config("kill_switch.max_errors must be at least 1"));
        }
        if self.notifier.timeout_secs == 0 {
            return Err(Error::config("notifier.timeout_secs must be at least 1"));
        }
        if self.daemon.poll_interval_secs == 0 {
            return Err(Error::config("daemon.poll_interval_secs must be at least 1"));
        }
        Ok(())
    }

    /// Short SHA-256 fingerprint of the effective configuration, for log correlation.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(digest)[..8].to_string())
    }
}

fn overlay_notifier_env(
    builder: ConfigBuilder<config::builder::DefaultState>,
) -> Result<ConfigBuilder<config::builder::DefaultState>> {
    Ok(builder
        .set_override_option("notifier.telegram_token", env::var("TELEGRAM_BOT_TOKEN").ok())?
        .set_override_option("notifier.telegram_chat_id", env::var("TELEGRAM_CHAT_ID").ok())?
        .set_override_option("notifier.slack_webhook", env::var("SLACK_WEBHOOK_URL").ok())?)
}

/// Private keys are never accepted from configuration, at any depth.
fn reject_secret_keys(value: &serde_json::Value, prefix: &str) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if key.to_ascii_lowercase().contains("private_key") {
                    return Err(Error::ForbiddenKey { key: path });
                }
                reject_secret_keys(child, &path)?;
            }
            Ok(())
        }
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| reject_secret_keys(item, &format!("{prefix}[{i}]"))),
        _ => Ok(()),
    }
}
