// src/config.rs
//! Immutable runtime configuration, built once at startup and injected into
//! the aggregator and fetchers. Nothing in the core reads the environment
//! after construction.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Result-cache TTL in seconds; `<= 0` disables caching.
    pub cache_ttl_secs: i64,
    /// Dispatch sources marked experimental/fragile/very_fragile.
    pub allow_fragile: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Total attempts per outbound request (first try + retries).
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// API key for the Portal da Transparência; without it that source
    /// fails fast with a configuration message.
    pub transparencia_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            allow_fragile: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            transparencia_api_key: None,
        }
    }
}

impl AppConfig {
    /// Build from environment variables, falling back to defaults for
    /// anything unset or unparseable. Call `dotenvy::dotenv()` first if a
    /// `.env` file should participate.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cache_ttl_secs: env_parse("LICITA_CACHE_TTL_SECS", d.cache_ttl_secs),
            allow_fragile: env_parse("LICITA_ALLOW_FRAGILE", d.allow_fragile),
            connect_timeout: Duration::from_secs(env_parse(
                "LICITA_CONNECT_TIMEOUT_SECS",
                d.connect_timeout.as_secs(),
            )),
            request_timeout: Duration::from_secs(env_parse(
                "LICITA_REQUEST_TIMEOUT_SECS",
                d.request_timeout.as_secs(),
            )),
            retry_attempts: env_parse("LICITA_RETRY_ATTEMPTS", d.retry_attempts).max(1),
            retry_backoff: Duration::from_millis(env_parse(
                "LICITA_RETRY_BACKOFF_MS",
                d.retry_backoff.as_millis() as u64,
            )),
            transparencia_api_key: std::env::var("TRANSPARENCIA_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = AppConfig::default();
        assert_eq!(c.cache_ttl_secs, 3600);
        assert!(!c.allow_fragile);
        assert!(c.retry_attempts >= 1);
    }
}
