//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables are optional.
//!
//! - `QUICKPOLL_HOST` - Bind address (default: 127.0.0.1)
//! - `QUICKPOLL_PORT` - Listen port (default: 3000)
//! - `QUICKPOLL_ENV` - `development` or `production` (default: development)
//! - `QUICKPOLL_BASE_URL` - Public URL; session cookies are marked secure when
//!   it starts with `https://`
//! - `QUICKPOLL_SESSION_TTL_SECS` - Sign-in session lifetime (default: 86400)
//! - `QUICKPOLL_REAPER_INTERVAL_SECS` - Expired session sweep interval (default: 3600)
//! - `QUICKPOLL_HEARTBEAT_SECS` - SSE heartbeat interval (default: 15)
//! - `QUICKPOLL_EVENT_CAPACITY` - Per-subscriber event buffer (default: 256)
//! - `QUICKPOLL_RATE_LIMIT` - Enable per-IP rate limiting (default: true)
//! - `QUICKPOLL_LOG_FORMAT` - `pretty` or `json` (default: pretty)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Whether internal error details may be shown to clients.
    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("expected development or production, got {other:?}")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected pretty or json, got {other:?}")),
        }
    }
}

/// QuickPoll server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    pub environment: Environment,
    /// Public base URL, if the server sits behind a known origin
    pub base_url: Option<String>,
    /// How long a sign-in stays live
    pub session_ttl: Duration,
    /// Most cookie sessions kept in memory at once
    pub session_capacity: u64,
    pub reaper_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Events buffered per SSE subscriber before it starts skipping
    pub event_capacity: usize,
    pub rate_limit: bool,
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            environment: Environment::Development,
            base_url: None,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            session_capacity: 100_000,
            reaper_interval: Duration::from_secs(60 * 60),
            heartbeat_interval: Duration::from_secs(15),
            event_capacity: 256,
            rate_limit: true,
            log_format: LogFormat::Pretty,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let session_ttl = env.parse_or("QUICKPOLL_SESSION_TTL_SECS", 24 * 60 * 60)?;
        let reaper_interval = env.parse_or("QUICKPOLL_REAPER_INTERVAL_SECS", 60 * 60)?;
        let heartbeat_interval = env.parse_or("QUICKPOLL_HEARTBEAT_SECS", 15)?;

        let event_capacity: usize = env.parse_or("QUICKPOLL_EVENT_CAPACITY", 256)?;
        if event_capacity == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "QUICKPOLL_EVENT_CAPACITY".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let session_capacity: u64 = env.parse_or("QUICKPOLL_SESSION_CAPACITY", 100_000)?;
        if session_capacity == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "QUICKPOLL_SESSION_CAPACITY".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            host: env.parse_or("QUICKPOLL_HOST", IpAddr::V4(Ipv4Addr::LOCALHOST))?,
            port: env.parse_or("QUICKPOLL_PORT", 3000)?,
            environment: env.parse_or("QUICKPOLL_ENV", Environment::Development)?,
            base_url: env.get_optional("QUICKPOLL_BASE_URL"),
            session_ttl: positive_secs("QUICKPOLL_SESSION_TTL_SECS", session_ttl)?,
            session_capacity,
            reaper_interval: positive_secs("QUICKPOLL_REAPER_INTERVAL_SECS", reaper_interval)?,
            heartbeat_interval: positive_secs("QUICKPOLL_HEARTBEAT_SECS", heartbeat_interval)?,
            event_capacity,
            rate_limit: env.parse_or("QUICKPOLL_RATE_LIMIT", true)?,
            log_format: env.parse_or("QUICKPOLL_LOG_FORMAT", LogFormat::Pretty)?,
            sentry_dsn: env.get_optional("SENTRY_DSN"),
            sentry_environment: env.get_optional("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether session cookies should carry the `Secure` flag.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.base_url
            .as_deref()
            .is_some_and(|url| url.starts_with("https://"))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Get an optional variable, treating blank values as unset.
    fn get_optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    /// Parse a variable, falling back to `default` when unset.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        self.get_optional(key).map_or(Ok(default), |value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.session_capacity, 100_000);
        assert_eq!(config.reaper_interval, Duration::from_secs(3_600));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.event_capacity, 256);
        assert!(config.rate_limit);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.sentry_dsn.is_none());
        assert!(!config.secure_cookies());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("QUICKPOLL_HOST", "0.0.0.0"),
            ("QUICKPOLL_PORT", "8080"),
            ("QUICKPOLL_ENV", "production"),
            ("QUICKPOLL_BASE_URL", "https://poll.example.com"),
            ("QUICKPOLL_SESSION_TTL_SECS", "60"),
            ("QUICKPOLL_SESSION_CAPACITY", "500"),
            ("QUICKPOLL_RATE_LIMIT", "false"),
            ("QUICKPOLL_LOG_FORMAT", "json"),
            ("SENTRY_DSN", "https://key@sentry.example.com/1"),
        ])
        .unwrap();

        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.environment, Environment::Production);
        assert!(!config.environment.is_development());
        assert!(config.secure_cookies());
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.session_capacity, 500);
        assert!(!config.rate_limit);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.sentry_dsn.is_some());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("QUICKPOLL_PORT", "  "), ("SENTRY_DSN", "")]).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[("QUICKPOLL_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "QUICKPOLL_PORT"));

        assert!(load(&[("QUICKPOLL_ENV", "staging")]).is_err());
        assert!(load(&[("QUICKPOLL_HEARTBEAT_SECS", "0")]).is_err());
        assert!(load(&[("QUICKPOLL_EVENT_CAPACITY", "0")]).is_err());
        assert!(load(&[("QUICKPOLL_SESSION_CAPACITY", "0")]).is_err());
        assert!(load(&[("QUICKPOLL_RATE_LIMIT", "maybe")]).is_err());
    }
}
