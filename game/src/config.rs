//! Client and mock server settings, resolved from the environment.
//!
//! Resolvers take a `get_env` function instead of reading `std::env` directly so they can
//! be exercised with fixed inputs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api/v1";
pub const DEFAULT_TICK: Duration = Duration::from_millis(1_000);
pub const MIN_TICK: Duration = Duration::from_millis(50);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

const API_BASE_ENV: &str = "SPOTDIFF_API_BASE";
const STORE_PATH_ENV: &str = "SPOTDIFF_STORE_PATH";
const TICK_ENV: &str = "SPOTDIFF_TICK_MS";
const TIMEOUT_ENV: &str = "SPOTDIFF_REQUEST_TIMEOUT_MS";
const MOCK_ADDR_ENV: &str = "SPOTDIFF_MOCK_ADDR";
const MOCK_PORT_ENV: &str = "SPOTDIFF_MOCK_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("api base `{0}` must start with http://")]
    UnsupportedScheme(String),
    #[error("api base `{0}` has no host")]
    MissingHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base: String,
    pub store_path: PathBuf,
    pub tick: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values keep their defaults.
    pub fn resolve<F>(mut get_env: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base = get_env(API_BASE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let store_path = get_env(STORE_PATH_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path);

        let tick = get_env(TICK_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .map(|d| d.clamp(MIN_TICK, DEFAULT_TICK))
            .unwrap_or(DEFAULT_TICK);

        let request_timeout = get_env(TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        Self {
            api_base,
            store_path,
            tick,
            request_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(rest) = self.api_base.strip_prefix("http://") else {
            return Err(ConfigError::UnsupportedScheme(self.api_base.clone()));
        };
        if rest.split('/').next().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingHost(self.api_base.clone()));
        }
        Ok(())
    }
}

/// `<platform config dir>/spotdiff/storage.json`, or relative to the working directory when
/// the platform has none.
fn default_store_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spotdiff")
        .join("storage.json")
}

pub fn resolve_mock_addr<F>(mut get_env: F) -> SocketAddr
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(addr) = get_env(MOCK_ADDR_ENV).and_then(|v| v.parse().ok()) {
        return addr;
    }

    let port = get_env(MOCK_PORT_ENV)
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8000);
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl FnMut(&str) -> Option<String> + 'a {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_without_env() {
        let config = ClientConfig::resolve(|_| None);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.tick, DEFAULT_TICK);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.store_path, default_store_path());
        assert!(config.store_path.ends_with("spotdiff/storage.json"));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn explicit_store_path_overrides_the_config_dir() {
        let config = ClientConfig::resolve(env(&[("SPOTDIFF_STORE_PATH", "/tmp/s.json")]));
        assert_eq!(config.store_path, PathBuf::from("/tmp/s.json"));

        let config = ClientConfig::resolve(env(&[("SPOTDIFF_STORE_PATH", "  ")]));
        assert_eq!(config.store_path, default_store_path());
    }

    #[test]
    fn tick_is_clamped_and_bad_numbers_are_ignored() {
        let config = ClientConfig::resolve(env(&[("SPOTDIFF_TICK_MS", "10")]));
        assert_eq!(config.tick, MIN_TICK);
        let config = ClientConfig::resolve(env(&[("SPOTDIFF_TICK_MS", "5000")]));
        assert_eq!(config.tick, DEFAULT_TICK);
        let config = ClientConfig::resolve(env(&[("SPOTDIFF_TICK_MS", "250")]));
        assert_eq!(config.tick, Duration::from_millis(250));
        let config = ClientConfig::resolve(env(&[
            ("SPOTDIFF_TICK_MS", "soon"),
            ("SPOTDIFF_REQUEST_TIMEOUT_MS", "0"),
        ]));
        assert_eq!(config.tick, DEFAULT_TICK);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn https_bases_are_rejected() {
        let config = ClientConfig::resolve(env(&[("SPOTDIFF_API_BASE", "https://example.com/api")]));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        let config = ClientConfig::resolve(env(&[("SPOTDIFF_API_BASE", "http:///api")]));
        assert!(matches!(config.validate(), Err(ConfigError::MissingHost(_))));
    }

    #[test]
    fn mock_addr_defaults_to_8000() {
        let addr = resolve_mock_addr(|_| None);
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 8000)));
    }

    #[test]
    fn mock_addr_prefers_explicit_addr_and_falls_back_to_port() {
        let addr = resolve_mock_addr(env(&[("SPOTDIFF_MOCK_ADDR", "0.0.0.0:9100")]));
        assert_eq!(addr, "0.0.0.0:9100".parse().unwrap());

        let addr = resolve_mock_addr(env(&[
            ("SPOTDIFF_MOCK_ADDR", "nowhere"),
            ("SPOTDIFF_MOCK_PORT", "9101"),
        ]));
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9101)));
    }
}
