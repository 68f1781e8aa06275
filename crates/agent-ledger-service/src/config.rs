//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use agent_ledger_core::QuotaDefaults;

/// Where ledger data is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process tables; lost on restart.
    Memory,
    /// `RocksDB` under `data_dir`.
    RocksDb,
}

impl StoreBackend {
    const fn compiled_default() -> Self {
        if cfg!(feature = "rocksdb-backend") {
            Self::RocksDb
        } else {
            Self::Memory
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::RocksDb),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/agent-ledger").
    pub data_dir: String,

    /// Storage backend.
    pub store_backend: StoreBackend,

    /// Whether admin routes require a bearer token.
    pub admin_auth_enabled: bool,

    /// HS256 secret for admin tokens.
    pub admin_jwt_secret: Option<String>,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Refill worker tick in seconds; 0 disables the worker.
    pub refill_interval_seconds: u64,

    /// Platform share of every billed action.
    pub fee_platform_rate: Decimal,

    /// Referrer share of every billed action that names a referrer.
    pub fee_referrer_rate: Decimal,

    /// Quota given to new user accounts.
    pub quota_defaults: QuotaDefaults,
}

/// Admin secrets file structure.
#[derive(Debug, Deserialize)]
struct AdminSecrets {
    jwt_secret: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            store_backend: env_parse("STORE_BACKEND").unwrap_or(defaults.store_backend),
            admin_auth_enabled: env_parse("ADMIN_AUTH_ENABLED")
                .unwrap_or(defaults.admin_auth_enabled),
            admin_jwt_secret: load_admin_secret(),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            refill_interval_seconds: env_parse("REFILL_INTERVAL_SECONDS")
                .unwrap_or(defaults.refill_interval_seconds),
            fee_platform_rate: env_parse("FEE_PLATFORM_RATE")
                .unwrap_or(defaults.fee_platform_rate),
            fee_referrer_rate: env_parse("FEE_REFERRER_RATE")
                .unwrap_or(defaults.fee_referrer_rate),
            quota_defaults: QuotaDefaults {
                free_quota: env_parse("DEFAULT_FREE_QUOTA").unwrap_or(Decimal::ZERO),
                refill_amount: env_parse("DEFAULT_REFILL_AMOUNT").unwrap_or(Decimal::ZERO),
            },
        }
    }
}

/// Read and parse an environment variable, ignoring it when malformed.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring malformed environment variable");
            None
        }
    }
}

/// Load the admin token secret from file or environment.
fn load_admin_secret() -> Option<String> {
    let secret_paths = [
        ".secrets/admin.json",
        "agent-ledger/.secrets/admin.json",
        "../.secrets/admin.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<AdminSecrets>(path) {
            tracing::info!(path = %path, "Loaded admin secrets from file");
            return Some(secrets.jwt_secret);
        }
    }

    tracing::debug!("Admin secrets file not found, using environment variables");
    std::env::var("ADMIN_JWT_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/agent-ledger".into(),
            store_backend: StoreBackend::compiled_default(),
            admin_auth_enabled: false,
            admin_jwt_secret: None,
            service_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            refill_interval_seconds: 300,
            fee_platform_rate: Decimal::ZERO,
            fee_referrer_rate: Decimal::ZERO,
            quota_defaults: QuotaDefaults::default(),
        }
    }
}
