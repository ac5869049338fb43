use serde::Deserialize;
use std::env;
use std::str::FromStr;

use config::ConfigError;

/// Where quiz data lives. `Memory` is for local development and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(ConfigError::Message(format!(
                "unknown storage backend '{}', expected 'mongo' or 'memory'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Delivery function URL. Messages are only logged when unset.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryFlowConfig {
    /// Lifetime of a pending retry request.
    pub request_ttl_hours: f64,
    pub expiry_sweep_interval_secs: u64,
    pub idempotency_ttl_secs: u64,
}

impl Default for RetryFlowConfig {
    fn default() -> Self {
        Self {
            request_ttl_hours: 168.0,
            expiry_sweep_interval_secs: 300,
            idempotency_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub storage_backend: StorageBackend,
    pub notifications: NotificationConfig,
    pub retries: RetryFlowConfig,
}

/// Reads `key` from the layered config, then `env_key` from the process
/// environment. Blank values count as missing.
fn lookup(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::Message(format!("invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
        let is_prod = app_env == "prod";

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let storage_backend = parse_or(
            lookup(&settings, "storage.backend", "STORAGE_BACKEND"),
            "storage backend",
            StorageBackend::Mongo,
        )?;

        let mongo_uri = match lookup(&settings, "database.mongo_uri", "MONGO_URI") {
            Some(uri) => uri,
            None if is_prod && storage_backend == StorageBackend::Mongo => {
                return Err(ConfigError::NotFound("database.mongo_uri".to_string()));
            }
            None => "mongodb://localhost:27017".to_string(),
        };

        let redis_uri = lookup(&settings, "redis.uri", "REDIS_URI").unwrap_or_else(|| {
            let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
            let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
            match env::var("REDIS_PASSWORD") {
                Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                Err(_) => format!("redis://{}:{}/0", host, port),
            }
        });

        let mongo_database = lookup(&settings, "database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "quizretry".to_string());

        let jwt_secret = match lookup(&settings, "auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if is_prod => {
                return Err(ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let bind_addr = lookup(&settings, "server.bind_addr", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string());

        let notifications = NotificationConfig {
            endpoint: lookup(&settings, "notifications.endpoint", "NOTIFICATION_ENDPOINT"),
            api_key: lookup(&settings, "notifications.api_key", "NOTIFICATION_API_KEY"),
            timeout_ms: parse_or(
                lookup(&settings, "notifications.timeout_ms", "NOTIFICATION_TIMEOUT_MS"),
                "notification timeout",
                5_000,
            )?,
        };

        let defaults = RetryFlowConfig::default();
        let retries = RetryFlowConfig {
            request_ttl_hours: parse_or(
                lookup(&settings, "retries.request_ttl_hours", "RETRY_REQUEST_TTL_HOURS"),
                "retry request ttl",
                defaults.request_ttl_hours,
            )?,
            expiry_sweep_interval_secs: parse_or(
                lookup(
                    &settings,
                    "retries.expiry_sweep_interval_secs",
                    "RETRY_EXPIRY_SWEEP_INTERVAL_SECS",
                ),
                "expiry sweep interval",
                defaults.expiry_sweep_interval_secs,
            )?,
            idempotency_ttl_secs: parse_or(
                lookup(&settings, "retries.idempotency_ttl_secs", "IDEMPOTENCY_TTL_SECS"),
                "idempotency ttl",
                defaults.idempotency_ttl_secs,
            )?,
        };

        if !retries.request_ttl_hours.is_finite() || retries.request_ttl_hours <= 0.0 {
            return Err(ConfigError::Message(
                "retry request ttl must be a positive number of hours".to_string(),
            ));
        }

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            storage_backend,
            notifications,
            retries,
        })
    }

    /// Configuration for tests and local runs without any external service.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "quizretry".to_string(),
            jwt_secret: jwt_secret.into(),
            bind_addr: "127.0.0.1:0".to_string(),
            storage_backend: StorageBackend::Memory,
            notifications: NotificationConfig {
                endpoint: None,
                api_key: None,
                timeout_ms: 5_000,
            },
            retries: RetryFlowConfig::default(),
        }
    }
}
