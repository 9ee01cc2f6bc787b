use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 1323;
const CONFIG_DIR: &str = "config";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:1323";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROVIDER_URL: &str = "https://merchant.qpay.mn/v2";
const DEFAULT_INVOICE_CODE: &str = "INV-000";
/// Ulaanbaatar, UTC+8
const DEFAULT_TIMEZONE_OFFSET_SECS: i32 = 8 * 3600;
const DEFAULT_INVOICE_EXPIRE_SECONDS: u64 = 600;

/// Payment provider connection settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider API base URL, without trailing slash
    #[serde(default = "default_provider_url")]
    #[validate(url)]
    pub base_url: String,

    /// Basic-auth username for the token exchange
    #[serde(default)]
    pub username: String,

    /// Basic-auth password for the token exchange
    #[serde(default)]
    pub password: String,

    /// Merchant invoice code issued by the provider
    #[serde(default = "default_invoice_code")]
    pub invoice_code: String,

    /// UTC offset used when rendering `expiry_date` for the provider
    #[serde(default = "default_timezone_offset_secs")]
    #[validate(range(min = -86399, max = 86399))]
    pub timezone_offset_secs: i32,

    /// Outbound HTTP timeout for provider calls
    #[serde(default = "default_provider_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            username: String::new(),
            password: String::new(),
            invoice_code: default_invoice_code(),
            timezone_offset_secs: default_timezone_offset_secs(),
            http_timeout_secs: default_provider_http_timeout_secs(),
        }
    }
}

/// Invoice lifecycle tuning
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct InvoiceConfig {
    /// Seconds after creation at which an unpaid invoice goes stale
    #[serde(default = "default_invoice_expire_seconds")]
    #[validate(range(min = 1))]
    pub expire_seconds: u64,

    /// Mark expired unpaid invoices as failed when a status check finds them unpaid
    #[serde(default)]
    pub fail_expired_on_check: bool,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            expire_seconds: default_invoice_expire_seconds(),
            fail_expired_on_check: false,
        }
    }
}

impl InvoiceConfig {
    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_seconds)
    }
}

/// Outbound caller notification policy
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Per-attempt timeout
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,

    /// First backoff delay; doubles after each failed attempt
    #[serde(default = "default_notifier_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_notifier_max_attempts(),
            timeout_secs: default_notifier_timeout_secs(),
            initial_backoff_ms: default_notifier_initial_backoff_ms(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// Externally reachable base URL, used to build provider callback URLs
    #[serde(default = "default_public_url")]
    #[validate(url)]
    pub public_url: String,

    /// Deadline applied to every inbound request (seconds)
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Shared secret expected in `X-API-KEY`; unset disables the check
    #[serde(default)]
    pub api_key: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub provider: ProviderConfig,

    #[serde(default)]
    #[validate]
    pub invoice: InvoiceConfig,

    #[serde(default)]
    #[validate]
    pub notifier: NotifierConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            public_url: default_public_url(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            provider: ProviderConfig::default(),
            invoice: InvoiceConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured API key, ignoring blank values
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_public_url() -> String {
    DEFAULT_PUBLIC_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_provider_url() -> String {
    DEFAULT_PROVIDER_URL.to_string()
}

fn default_invoice_code() -> String {
    DEFAULT_INVOICE_CODE.to_string()
}

fn default_timezone_offset_secs() -> i32 {
    DEFAULT_TIMEZONE_OFFSET_SECS
}

fn default_provider_http_timeout_secs() -> u64 {
    10
}

fn default_invoice_expire_seconds() -> u64 {
    DEFAULT_INVOICE_EXPIRE_SECONDS
}

fn default_notifier_max_attempts() -> u32 {
    3
}

fn default_notifier_timeout_secs() -> u64 {
    5
}

fn default_notifier_initial_backoff_ms() -> u64 {
    1000
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*, nested sections as APP__PROVIDER__USERNAME)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://invoice_gateway.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            1323,
            "test".into(),
        )
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = base_config();
        assert_eq!(cfg.invoice.expire_seconds, 600);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.provider.base_url, "https://merchant.qpay.mn/v2");
        assert_eq!(cfg.provider.invoice_code, "INV-000");
        assert_eq!(cfg.provider.timezone_offset_secs, 28_800);
        assert!(!cfg.invoice.fail_expired_on_check);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn blank_api_key_disables_check() {
        let mut cfg = base_config();
        assert_eq!(cfg.api_key(), None);
        cfg.api_key = Some("   ".into());
        assert_eq!(cfg.api_key(), None);
        cfg.api_key = Some("secret".into());
        assert_eq!(cfg.api_key(), Some("secret"));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_expiry() {
        let mut cfg = base_config();
        cfg.invoice.expire_seconds = 0;
        assert!(cfg.validate().is_err());
    }
}
