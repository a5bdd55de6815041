//! Configuration for the perps engine
//!
//! Loaded from a TOML file with `.env` and environment-variable overrides.
//! Every field has a default so a missing file still yields a usable config.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub use crate::rpc_manager::RpcConfig;
use crate::markets::JUPITER_PERPS_PROGRAM_ID;

/// Configuration-related errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Endpoint URLs and retry tuning
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Target program and its interface description
    #[serde(default)]
    pub program: ProgramConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    /// Compute-budget directives prepended to every transaction
    #[serde(default)]
    pub compute_budget: ComputeBudgetConfig,

    #[serde(default)]
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub price_feed: PriceFeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    #[serde(default = "default_program_id")]
    pub program_id: String,

    /// Anchor IDL JSON; built-in layout and seeds are used when absent
    #[serde(default)]
    pub idl_path: Option<String>,

    /// Referral account; the position owner when unset
    #[serde(default)]
    pub referral: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Pool account overriding the registry default
    #[serde(default)]
    pub pool: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputeBudgetConfig {
    #[serde(default = "default_unit_limit")]
    pub unit_limit: u32,

    /// Priority fee in micro-lamports per compute unit
    #[serde(default = "default_unit_price")]
    pub unit_price_micro_lamports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Simulate only; never send
    #[serde(default)]
    pub dry_run: bool,

    /// Allow the single custody/collateral-custody swap on the ordering diagnostic
    #[serde(default = "default_true")]
    pub allow_custody_swap: bool,

    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wrap native SOL into the funding account when collateral is WSOL
    #[serde(default = "default_true")]
    pub wrap_native: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    #[serde(default = "default_price_url")]
    pub url: String,

    #[serde(default = "default_price_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_program_id() -> String {
    JUPITER_PERPS_PROGRAM_ID.to_string()
}

fn default_keypair_path() -> String {
    "~/.config/solana/id.json".to_string()
}

fn default_unit_limit() -> u32 {
    800_000
}

fn default_unit_price() -> u64 {
    100_000
}

fn default_true() -> bool {
    true
}

fn default_confirm_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_price_url() -> String {
    "https://lite-api.jup.ag/price/v2".to_string()
}

fn default_price_timeout_ms() -> u64 {
    5_000
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
            idl_path: None,
            referral: None,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for ComputeBudgetConfig {
    fn default() -> Self {
        Self {
            unit_limit: default_unit_limit(),
            unit_price_micro_lamports: default_unit_price(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            allow_custody_swap: true,
            confirm_timeout_ms: default_confirm_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            wrap_native: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            url: default_price_url(),
            timeout_ms: default_price_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read config file {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse TOML: {}", e)))
    }

    /// File (if present) + `.env` + process environment, then validate
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            warn!("Config file '{}' not found, using defaults", path);
            Self::default()
        };

        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment overrides read through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.rpc.apply_env_with(&lookup)?;

        if let Some(program_id) = lookup("PERPS_PROGRAM_ID") {
            self.program.program_id = program_id.trim().to_string();
        }
        if let Some(idl_path) = lookup("PERPS_IDL_PATH") {
            self.program.idl_path = Some(idl_path.trim().to_string());
        }
        if let Some(referral) = lookup("PERPS_REFERRAL") {
            self.program.referral = Some(referral.trim().to_string());
        }
        if let Some(raw) = lookup("PERPS_CU_LIMIT") {
            self.compute_budget.unit_limit = parse_env("PERPS_CU_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("PERPS_CU_PRICE") {
            self.compute_budget.unit_price_micro_lamports = parse_env("PERPS_CU_PRICE", &raw)?;
        }
        if let Some(raw) = lookup("PERPS_DISABLE_CUSTODY_SWAP") {
            if env_flag(&raw) {
                self.submission.allow_custody_swap = false;
            }
        }
        if let Some(raw) = lookup("PERPS_DRY_RUN") {
            self.submission.dry_run = env_flag(&raw);
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc.validate()?;
        self.program_id()?;
        self.pool_override()?;
        self.referral()?;

        if self.compute_budget.unit_limit > 1_400_000 {
            return Err(ConfigError::Validation(format!(
                "compute unit limit {} exceeds the 1,400,000 maximum",
                self.compute_budget.unit_limit
            )));
        }
        if self.submission.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.submission.confirm_timeout_ms < self.submission.poll_interval_ms {
            return Err(ConfigError::Validation(
                "confirm_timeout_ms must be at least poll_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pool_override(&self) -> Result<Option<Pubkey>, ConfigError> {
        self.market
            .pool
            .as_deref()
            .map(|raw| {
                Pubkey::from_str(raw.trim()).map_err(|e| {
                    ConfigError::Validation(format!("invalid pool override {}: {}", raw, e))
                })
            })
            .transpose()
    }

    pub fn referral(&self) -> Result<Option<Pubkey>, ConfigError> {
        self.program
            .referral
            .as_deref()
            .map(|raw| {
                Pubkey::from_str(raw.trim()).map_err(|e| {
                    ConfigError::Validation(format!("invalid referral {}: {}", raw, e))
                })
            })
            .transpose()
    }

    pub fn program_id(&self) -> Result<Pubkey, ConfigError> {
        Pubkey::from_str(&self.program.program_id).map_err(|e| {
            ConfigError::Validation(format!(
                "invalid program id {}: {}",
                self.program.program_id, e
            ))
        })
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{} has an invalid value: {}", key, raw)))
}

fn env_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
