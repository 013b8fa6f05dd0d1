// Configuration loading and parsing (server.toml, bookkeeping.toml,
// credentials.toml).

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub db_path: String,
    pub storage: StorageConfig,
    pub log_filter: String,
    pub tax: TaxConfig,
    pub ai: AiConfig,
    pub currency: CurrencyConfig,
    pub fraud: FraudConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire server.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ServerFile {
    server: ServerConfig,
    database: DatabaseSection,
    storage: StorageConfig,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LoggingSection {
    filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "baht=info,warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Local,
    Supabase,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the local backend.
    pub local_dir: String,
    /// Bucket name for the Supabase backend.
    pub bucket: String,
    /// Uploads larger than this are refused.
    pub max_upload_bytes: usize,
}

// ---------------------------------------------------------------------------
// bookkeeping.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct BookkeepingFile {
    tax: TaxConfig,
    ai: AiConfig,
    currency: CurrencyConfig,
    fraud: FraudConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxConfig {
    pub default_vat_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Total attempts per AI call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: u32,
    /// Request timeout for a single attempt.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    pub base: String,
    /// THB per unit used when no stored rate exists for a date.
    #[serde(default)]
    pub fallback_rates: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FraudConfig {
    pub medium_threshold: u8,
    pub high_threshold: u8,
    /// Documents older than this many days are flagged as stale.
    pub stale_after_days: i64,
    /// AI confidence below this is flagged.
    pub low_confidence: f64,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub gemini_api_key: Option<String>,
    pub line_channel_access_token: Option<String>,
    /// LINE group or room that receives company-wide notices.
    pub line_group_id: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

/// Static API key mapped to a user.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub name: String,
    pub key: String,
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Files `load_config()` seeds from `defaults/` when they are missing.
/// `credentials.toml` is never seeded; operators copy the `.example` by hand.
const SEEDED_FILES: [&str; 2] = ["server.toml", "bookkeeping.toml"];

/// Load and validate `config/server.toml`, `config/bookkeeping.toml` and, if
/// present, `config/credentials.toml` under `base_dir`.
///
/// Does not seed defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    let server_file: ServerFile = parse_file(&config_dir.join("server.toml"))?;
    let bookkeeping: BookkeepingFile = parse_file(&config_dir.join("bookkeeping.toml"))?;
    let credentials_path = config_dir.join("credentials.toml");
    let credentials: CredentialsConfig = if credentials_path.exists() {
        parse_file(&credentials_path)?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: server_file.server,
        db_path: server_file.database.path,
        storage: server_file.storage,
        log_filter: server_file.logging.filter,
        tax: bookkeeping.tax,
        ai: bookkeeping.ai,
        currency: bookkeeping.currency,
        fraud: bookkeeping.fraud,
        credentials,
    };
    validate(&config)?;
    Ok(config)
}

/// Copy each missing seeded file from `defaults/` into `config/`, returning
/// the paths written. Existing files are left untouched.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");
    let seed_error = |message: String| ConfigError::DefaultsCopyError { message };

    if !defaults_dir.is_dir() {
        return if config_dir.is_dir() {
            Ok(Vec::new())
        } else {
            Err(seed_error(format!(
                "neither defaults/ nor config/ exists under {}; start the server from the project root",
                base_dir.display()
            )))
        };
    }
    std::fs::create_dir_all(&config_dir)
        .map_err(|e| seed_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut written = Vec::new();
    for name in SEEDED_FILES {
        let source = defaults_dir.join(name);
        let target = config_dir.join(name);
        if target.exists() || !source.is_file() {
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| {
            seed_error(format!("cannot copy {} to {}: {e}", source.display(), target.display()))
        })?;
        info!("seeded {} from defaults", target.display());
        written.push(target);
    }
    Ok(written)
}

/// Load config relative to the current directory, seeding defaults first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port", "must be greater than 0"));
    }

    if config.storage.max_upload_bytes == 0 {
        return Err(invalid("storage.max_upload_bytes", "must be greater than 0"));
    }

    if config.storage.backend == StorageBackend::Supabase {
        let creds = &config.credentials;
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if !has(&creds.supabase_url) || !has(&creds.supabase_service_key) {
            return Err(invalid(
                "storage.backend",
                "supabase backend requires supabase_url and supabase_service_key in credentials.toml",
            ));
        }
    }

    let vat = config.tax.default_vat_rate;
    if vat < Decimal::ZERO || vat > Decimal::ONE_HUNDRED {
        return Err(invalid(
            "tax.default_vat_rate",
            format!("must be between 0 and 100 inclusive, got {vat}"),
        ));
    }

    let ai = &config.ai;
    if ai.max_attempts == 0 {
        return Err(invalid("ai.max_attempts", "must be at least 1"));
    }
    if ai.backoff_multiplier == 0 {
        return Err(invalid("ai.backoff_multiplier", "must be at least 1"));
    }
    if !(0.0..=2.0).contains(&ai.temperature) {
        return Err(invalid(
            "ai.temperature",
            format!("must be between 0.0 and 2.0, got {}", ai.temperature),
        ));
    }

    if config.currency.base != "THB" {
        return Err(invalid(
            "currency.base",
            format!("only THB books are supported, got {}", config.currency.base),
        ));
    }
    for (code, rate) in &config.currency.fallback_rates {
        if *rate <= Decimal::ZERO {
            return Err(invalid(
                &format!("currency.fallback_rates.{code}"),
                format!("must be > 0, got {rate}"),
            ));
        }
    }

    let fraud = &config.fraud;
    if fraud.medium_threshold >= fraud.high_threshold || fraud.high_threshold > 100 {
        return Err(invalid(
            "fraud.high_threshold",
            format!(
                "thresholds must satisfy medium < high <= 100, got {} / {}",
                fraud.medium_threshold, fraud.high_threshold
            ),
        ));
    }
    if !(1..=3650).contains(&fraud.stale_after_days) {
        return Err(invalid(
            "fraud.stale_after_days",
            format!("must be between 1 and 3650, got {}", fraud.stale_after_days),
        ));
    }
    if !(0.0..=1.0).contains(&fraud.low_confidence) {
        return Err(invalid(
            "fraud.low_confidence",
            format!("must be between 0.0 and 1.0, got {}", fraud.low_confidence),
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
