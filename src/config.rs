use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub mongodb_url: Option<String>,
    pub mongodb_database: String,
    pub redis_url: String,

    // Worker
    pub worker_poll_seconds: u64,
    pub temp_variable_ttl_seconds: u64,

    // Execution engine
    pub engine: EngineConfig,
}

/// Store-independent settings consumed by the orchestrator
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on cases dispatched at once within one batch
    pub max_concurrent_tests: usize,
    /// Default per-attempt deadline when an execution does not set one
    pub default_timeout: Duration,
    pub default_retries: u32,
    pub default_backoff: Duration,
    /// How many times a resolved value may be re-scanned for placeholders
    pub resolver_max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tests: 10,
            default_timeout: Duration::from_secs(30),
            default_retries: 2,
            default_backoff: Duration::from_millis(200),
            resolver_max_depth: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if exists

        Ok(Self {
            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            mongodb_url: env::var("MONGODB_URL").ok().filter(|url| !url.is_empty()),
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "serval_run".to_string()),
            redis_url: env::var("REDIS_URL").map_err(|_| ConfigError::Missing("REDIS_URL"))?,

            // Worker
            worker_poll_seconds: parse_or("WORKER_POLL_SECONDS", 5)?,
            temp_variable_ttl_seconds: parse_or("TEMP_VARIABLE_TTL_SECONDS", 86_400)?,

            engine: EngineConfig::from_env()?,
        })
    }
}

impl EngineConfig {
    /// Load engine settings, falling back to defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_concurrent_tests: usize =
            parse_or("MAX_CONCURRENT_TESTS", defaults.max_concurrent_tests)?;
        if max_concurrent_tests == 0 {
            return Err(ConfigError::Invalid("MAX_CONCURRENT_TESTS"));
        }

        Ok(Self {
            max_concurrent_tests,
            default_timeout: Duration::from_secs(parse_or(
                "TEST_TIMEOUT",
                defaults.default_timeout.as_secs(),
            )?),
            default_retries: parse_or("TEST_RETRIES", defaults.default_retries)?,
            default_backoff: Duration::from_millis(parse_or(
                "TEST_BACKOFF_MS",
                defaults.default_backoff.as_millis() as u64,
            )?),
            resolver_max_depth: parse_or("RESOLVER_MAX_DEPTH", defaults.resolver_max_depth)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid environment variable: {0}")]
    Invalid(&'static str),
}
