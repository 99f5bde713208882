//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::approval::{ControllerConfig, ExpiryPolicy};
use crate::export::ExportConfig;
use crate::screening::{ScreeningConfig, DEFAULT_MATCH_THRESHOLD};
use crate::signing::ApprovalSigner;

/// Longest accepted approval TTL, one leap year
pub const MAX_PENDING_APPROVAL_TTL_MINUTES: i64 = 60 * 24 * 366;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    /// Similarity score at or above which a payee is held
    pub sanctions_match_threshold: f64,

    /// Watch list JSON file loaded at start-up
    pub watch_list_path: Option<PathBuf>,

    /// Pending approvals older than this are rejected; unset disables expiry
    pub pending_approval_ttl_minutes: Option<i64>,

    /// Execute payments as soon as they are approved
    pub auto_execute: bool,

    /// pain.001 initiating party
    pub initiating_party_name: String,

    /// BIC of the bank holding the debit accounts
    pub debtor_agent_bic: String,

    /// Prefix of generated message ids
    pub message_id_prefix: String,

    /// Interval between full audit chain verifications
    pub audit_verify_interval: Duration,

    /// Interval between pending-approval expiry sweeps
    pub expiry_sweep_interval: Duration,

    /// Approval signing key; a per-process key is generated when unset
    pub approval_signer: Option<ApprovalSigner>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let sanctions_match_threshold: f64 =
            parse_or("SANCTIONS_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD)?;
        if !(0.0..=1.0).contains(&sanctions_match_threshold) {
            return Err(ConfigError::InvalidValue("SANCTIONS_MATCH_THRESHOLD"));
        }

        let watch_list_path = env::var("WATCH_LIST_PATH").ok().map(PathBuf::from);

        let pending_approval_ttl_minutes =
            parse_ttl(env::var("PENDING_APPROVAL_TTL_MINUTES").ok().as_deref())?;

        let auto_execute = parse_or("AUTO_EXECUTE", true)?;

        let export_defaults = ExportConfig::default();
        let initiating_party_name = env::var("INITIATING_PARTY_NAME")
            .unwrap_or(export_defaults.initiating_party_name);
        let debtor_agent_bic =
            env::var("DEBTOR_AGENT_BIC").unwrap_or(export_defaults.debtor_agent_bic);
        let message_id_prefix =
            env::var("MESSAGE_ID_PREFIX").unwrap_or(export_defaults.message_id_prefix);

        let audit_verify_interval = parse_interval(
            "AUDIT_VERIFY_INTERVAL_SECS",
            env::var("AUDIT_VERIFY_INTERVAL_SECS").ok().as_deref(),
            300,
        )?;
        let expiry_sweep_interval = parse_interval(
            "EXPIRY_SWEEP_INTERVAL_SECS",
            env::var("EXPIRY_SWEEP_INTERVAL_SECS").ok().as_deref(),
            60,
        )?;

        let approval_signer = parse_signer(
            env::var("APPROVAL_SIGNING_KEY").ok().as_deref(),
            environment == "production",
        )?;

        Ok(Self {
            database_url,
            database_max_connections,
            environment,
            sanctions_match_threshold,
            watch_list_path,
            pending_approval_ttl_minutes,
            auto_execute,
            initiating_party_name,
            debtor_agent_bic,
            message_id_prefix,
            audit_verify_interval,
            expiry_sweep_interval,
            approval_signer,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn screening(&self) -> ScreeningConfig {
        ScreeningConfig {
            threshold: self.sanctions_match_threshold,
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            auto_execute: self.auto_execute,
            expiry: self
                .pending_approval_ttl_minutes
                .and_then(chrono::Duration::try_minutes)
                .map(|pending_ttl| ExpiryPolicy { pending_ttl }),
            signer: self.approval_signer.clone().unwrap_or(defaults.signer),
            expiry_batch_size: defaults.expiry_batch_size,
        }
    }

    pub fn export(&self) -> ExportConfig {
        ExportConfig {
            initiating_party_name: self.initiating_party_name.clone(),
            debtor_agent_bic: self.debtor_agent_bic.clone(),
            message_id_prefix: self.message_id_prefix.clone(),
            ..ExportConfig::default()
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Scheduler interval in seconds; zero would make the timer panic
fn parse_interval(
    name: &'static str,
    raw: Option<&str>,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    let secs = match raw {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue(name))?,
        None => default_secs,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidValue(name));
    }
    Ok(Duration::from_secs(secs))
}

/// Approval TTL in minutes, between one minute and
/// [`MAX_PENDING_APPROVAL_TTL_MINUTES`]
fn parse_ttl(raw: Option<&str>) -> Result<Option<i64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let minutes: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue("PENDING_APPROVAL_TTL_MINUTES"))?;
    if !(1..=MAX_PENDING_APPROVAL_TTL_MINUTES).contains(&minutes) {
        return Err(ConfigError::InvalidValue("PENDING_APPROVAL_TTL_MINUTES"));
    }
    Ok(Some(minutes))
}

/// Hex seed of the approval signing key. Production must configure one so
/// that approvals verify across restarts.
fn parse_signer(
    raw: Option<&str>,
    production: bool,
) -> Result<Option<ApprovalSigner>, ConfigError> {
    match raw {
        Some(seed) => ApprovalSigner::from_hex(seed)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue("APPROVAL_SIGNING_KEY")),
        None if production => Err(ConfigError::MissingEnv("APPROVAL_SIGNING_KEY")),
        None => Ok(None),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
