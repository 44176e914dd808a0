use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Scheduler intervals for the background sweeps
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Whether background jobs are started with the server
    #[serde(default = "default_true_bool")]
    pub enabled: bool,

    /// Polling sweep over active shipments (15 minutes)
    #[serde(default = "default_tracking_poll_interval")]
    #[validate(range(min = 1))]
    pub tracking_poll_interval_secs: u64,

    /// Maximum shipments fetched from carriers per polling sweep
    #[serde(default = "default_poll_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub poll_batch_size: u64,

    #[serde(default = "default_webhook_retry_interval")]
    #[validate(range(min = 1))]
    pub webhook_retry_interval_secs: u64,

    #[serde(default = "default_delay_check_interval")]
    #[validate(range(min = 1))]
    pub delay_check_interval_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tracking_poll_interval_secs: default_tracking_poll_interval(),
            poll_batch_size: default_poll_batch_size(),
            webhook_retry_interval_secs: default_webhook_retry_interval(),
            delay_check_interval_secs: default_delay_check_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Per-route-class request limits (requests per minute)
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(default = "default_webhook_rate_limit")]
    #[validate(range(min = 1))]
    pub webhook_per_minute: u32,

    #[serde(default = "default_manual_rate_limit")]
    #[validate(range(min = 1))]
    pub manual_tracking_per_minute: u32,

    #[serde(default = "default_bulk_rate_limit")]
    #[validate(range(min = 1))]
    pub bulk_update_per_minute: u32,

    /// Set when a proxy in front of the service rewrites `X-Forwarded-For`
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            webhook_per_minute: default_webhook_rate_limit(),
            manual_tracking_per_minute: default_manual_rate_limit(),
            bulk_update_per_minute: default_bulk_rate_limit(),
            trust_forwarded_for: false,
        }
    }
}

/// Sender block printed on carrier bookings
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyAddress {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HpExpressConfig {
    pub api_key: String,
    pub webhook_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DhlConfig {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub account_number: String,
    pub webhook_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverseasConfig {
    pub api_key: String,
    pub webhook_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoxNowConfig {
    pub api_key: String,
    pub webhook_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Carrier credentials, parsed once when the registry is built.
/// A carrier without a block is not registered.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CarrierSettings {
    /// Use carrier sandbox endpoints
    #[serde(default)]
    pub sandbox: bool,

    /// Timeout applied to every carrier HTTP call
    #[serde(default = "default_carrier_timeout")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub company: CompanyAddress,

    #[serde(default)]
    pub hp_express: Option<HpExpressConfig>,

    #[serde(default)]
    pub dhl: Option<DhlConfig>,

    #[serde(default)]
    pub overseas: Option<OverseasConfig>,

    #[serde(default)]
    pub boxnow: Option<BoxNowConfig>,
}

impl Default for CarrierSettings {
    fn default() -> Self {
        Self {
            sandbox: false,
            request_timeout_secs: default_carrier_timeout(),
            company: CompanyAddress::default(),
            hp_express: None,
            dhl: None,
            overseas: None,
            boxnow: None,
        }
    }
}

impl CarrierSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Webhook signing secret for a provider code, if that carrier is configured
    pub fn webhook_secret(&self, provider: &str) -> Option<&str> {
        match provider {
            "hp_express" => self.hp_express.as_ref().map(|c| c.webhook_secret.as_str()),
            "dhl" => self.dhl.as_ref().map(|c| c.webhook_secret.as_str()),
            "overseas" => self.overseas.as_ref().map(|c| c.webhook_secret.as_str()),
            "boxnow" => self.boxnow.as_ref().map(|c| c.webhook_secret.as_str()),
            _ => None,
        }
    }

    fn secrets(&self) -> Vec<(&'static str, &str, &str)> {
        let mut out = Vec::new();
        if let Some(c) = &self.hp_express {
            out.push(("hp_express", c.api_key.as_str(), c.webhook_secret.as_str()));
        }
        if let Some(c) = &self.dhl {
            out.push(("dhl", c.api_key.as_str(), c.webhook_secret.as_str()));
        }
        if let Some(c) = &self.overseas {
            out.push(("overseas", c.api_key.as_str(), c.webhook_secret.as_str()));
        }
        if let Some(c) = &self.boxnow {
            out.push(("boxnow", c.api_key.as_str(), c.webhook_secret.as_str()));
        }
        out
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Overall HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Shared key gating the admin shipping routes (`x-admin-key`)
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Shared key for the manual tracking trigger (`x-api-key`)
    #[serde(default)]
    pub manual_tracking_api_key: Option<String>,

    /// Endpoints receiving `shipment.status_changed` events
    #[serde(default)]
    pub outbound_webhook_urls: Vec<String>,

    #[serde(default)]
    #[validate]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    #[validate]
    pub rate_limits: RateLimitSettings,

    #[serde(default)]
    #[validate]
    pub carriers: CarrierSettings,
}

impl AppConfig {
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment: environment.into(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            admin_api_key: None,
            manual_tracking_api_key: None,
            outbound_webhook_urls: Vec::new(),
            scheduler: SchedulerConfig::default(),
            rate_limits: RateLimitSettings::default(),
            carriers: CarrierSettings::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.cors_origins().iter().any(|o| o == "*") {
            let mut err = ValidationError::new("cors_wildcard");
            err.message = Some("Wildcard CORS origin is not allowed in production".into());
            errors.add("cors_allowed_origins", err);
        }

        for (code, api_key, secret) in self.carriers.secrets() {
            if api_key.trim().is_empty() || secret.trim().is_empty() {
                let mut err = ValidationError::new("carrier_credentials");
                err.message = Some(format!("{} requires api_key and webhook_secret", code).into());
                errors.add("carriers", err);
            }
        }

        for key in [&self.admin_api_key, &self.manual_tracking_api_key]
            .into_iter()
            .flatten()
        {
            if key.trim().len() < 16 {
                let mut err = ValidationError::new("api_key_length");
                err.message = Some("API keys must be at least 16 characters".into());
                errors.add("api_keys", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true_bool() -> bool {
    true
}
fn default_country_code() -> String {
    "HR".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_tracking_poll_interval() -> u64 {
    15 * 60
}
fn default_poll_batch_size() -> u64 {
    100
}
fn default_webhook_retry_interval() -> u64 {
    5 * 60
}
fn default_delay_check_interval() -> u64 {
    60 * 60
}
fn default_cleanup_interval() -> u64 {
    24 * 60 * 60
}
fn default_webhook_rate_limit() -> u32 {
    30
}
fn default_manual_rate_limit() -> u32 {
    5
}
fn default_bulk_rate_limit() -> u32 {
    2
}
fn default_carrier_timeout() -> u64 {
    10
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!(
        "shipment_tracking={level},shipment_tracking_api={level},tower_http=info,sqlx=warn"
    );
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    load_config_from(CONFIG_DIR, &run_env)
}

fn load_config_from(config_dir: &str, run_env: &str) -> Result<AppConfig, AppConfigError> {
    let config = Config::builder()
        .set_default("database_url", "sqlite://shipments.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", config_dir, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("outbound_webhook_urls")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
