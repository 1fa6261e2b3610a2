use crate::error::{RelayError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HEALTHCHECK_URL: &str = "http://www.gstatic.com/generate_204";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Upstream proxy pool
    pub proxy: ProxyPoolConfig,
    /// Retry and backoff policy
    pub retry: RetryConfig,
    /// Startup proxy vetting
    pub healthcheck: HealthCheckConfig,
    /// Transcript fetching
    pub fetch: FetchConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to listen on (default: 8001)
    pub port: u16,
    /// Allowed CORS origins (comma-separated, empty = any origin)
    pub cors_origins: Vec<String>,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            cors_origins: Vec::new(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Parallel proxy lists as configured
///
/// `hosts`, `ports` and `usernames` are index-aligned. Ports stay strings so
/// one malformed entry can be skipped without shifting the others.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Route fetches through the pool (default: true when hosts are set)
    pub enabled: bool,
    pub hosts: Vec<String>,
    pub ports: Vec<String>,
    pub usernames: Vec<String>,
    /// Shared password, used when `passwords` is empty
    pub password: String,
    /// Per-entry passwords
    pub passwords: Vec<String>,
    /// Minimum spacing between two uses of one proxy
    pub min_interval: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
            ports: Vec::new(),
            usernames: Vec::new(),
            password: String::new(),
            passwords: Vec::new(),
            min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per operation
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of random jitter added to each backoff
    pub jitter: Duration,
    /// How long selection may wait for a busy proxy
    pub max_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
            jitter: Duration::from_millis(250),
            max_wait: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Probe proxies at startup
    pub enabled: bool,
    pub url: String,
    pub timeout: Duration,
    /// Concurrent probes
    pub workers: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_HEALTHCHECK_URL.to_string(),
            timeout: Duration::from_secs(10),
            workers: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Transport timeout of one attempt
    pub timeout: Duration,
    /// Language appended to every preference list
    pub default_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            default_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogConfig {
    /// Logging is set up before the rest of the configuration is validated
    pub fn from_env() -> Self {
        Self {
            level: get_env_or("LOG_LEVEL", "info"),
            format: get_env_or("LOG_FORMAT", "pretty").to_lowercase(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let hosts = split_list(&get_env_or("PROXY_HOSTS", ""));
        let proxy_enabled_default = if hosts.is_empty() { "false" } else { "true" };

        let config = Config {
            server: ServerConfig {
                host: get_env_or("HOST", "0.0.0.0"),
                port: parse_env("PORT", "8001")?,
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", "60")?),
            },
            proxy: ProxyPoolConfig {
                enabled: parse_bool("PROXY_ENABLED", proxy_enabled_default)?,
                hosts,
                ports: split_list(&get_env_or("PROXY_PORTS", "")),
                usernames: split_list(&get_env_or("PROXY_USERNAMES", "")),
                password: get_env_or("PROXY_PASSWORD", ""),
                passwords: split_list(&get_env_or("PROXY_PASSWORDS", "")),
                min_interval: Duration::from_millis(parse_env("PROXY_MIN_INTERVAL_MS", "1000")?),
            },
            retry: RetryConfig {
                max_attempts: parse_env("RETRY_MAX_ATTEMPTS", "3")?,
                base_delay: Duration::from_millis(parse_env("RETRY_BASE_DELAY_MS", "500")?),
                max_delay: Duration::from_millis(parse_env("RETRY_MAX_DELAY_MS", "8000")?),
                jitter: Duration::from_millis(parse_env("RETRY_JITTER_MS", "250")?),
                max_wait: Duration::from_millis(parse_env("PROXY_MAX_WAIT_MS", "5000")?),
            },
            healthcheck: HealthCheckConfig {
                enabled: parse_bool("HEALTHCHECK_ENABLED", "true")?,
                url: get_env_or("HEALTHCHECK_URL", DEFAULT_HEALTHCHECK_URL),
                timeout: Duration::from_secs(parse_env("HEALTHCHECK_TIMEOUT_SECS", "10")?),
                workers: parse_env("HEALTHCHECK_WORKERS", "8")?,
            },
            fetch: FetchConfig {
                timeout: Duration::from_secs(parse_env("FETCH_TIMEOUT_SECS", "20")?),
                default_language: get_env_or("DEFAULT_LANGUAGE", "en").trim().to_string(),
            },
            log: LogConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(RelayError::InvalidConfig(
                "RETRY_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(RelayError::InvalidConfig(
                "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS".into(),
            ));
        }
        if self.healthcheck.enabled && self.healthcheck.workers == 0 {
            return Err(RelayError::InvalidConfig(
                "HEALTHCHECK_WORKERS must be at least 1".into(),
            ));
        }
        if self.proxy.enabled && self.proxy.hosts.is_empty() {
            return Err(RelayError::InvalidConfig(
                "PROXY_ENABLED is set but PROXY_HOSTS is empty".into(),
            ));
        }
        if self.fetch.default_language.is_empty() {
            return Err(RelayError::InvalidConfig(
                "DEFAULT_LANGUAGE must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Get the HTTP server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RelayError::InvalidConfig(format!("{} must be a valid number", key)))
}

fn parse_bool(key: &str, default: &str) -> Result<bool> {
    match get_env_or(key, default).trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(RelayError::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

/// Split a comma list, keeping empty entries so parallel lists stay aligned
fn split_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|s| s.trim().to_string()).collect()
}
