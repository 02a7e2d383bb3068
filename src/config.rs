//! Runtime configuration from `.env` and the process environment

use std::time::Duration;

use crate::error::SplitError;
use crate::Result;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub port: u16,
}

impl Config {
    /// Load `.env` if present, then read the environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, or a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY").unwrap_or_default();

        let model = lookup("GEMINI_MODEL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = lookup("GEMINI_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = match lookup("GEMINI_TIMEOUT_SECS") {
            Some(v) => v.trim().parse::<u64>().map_err(|e| {
                SplitError::ConfigError(format!("GEMINI_TIMEOUT_SECS '{}': {}", v, e))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let port = match lookup("PORT").or_else(|| lookup("API_PORT")) {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|e| SplitError::ConfigError(format!("PORT '{}': {}", v, e)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            gemini: GeminiConfig {
                api_key,
                model,
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
        assert!(config.gemini.api_key.is_empty());
        assert_eq!(config.gemini.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "abc"),
            ("GEMINI_MODEL", "gemini-2.0-flash"),
            ("GEMINI_BASE_URL", "http://localhost:9000/models/"),
            ("API_PORT", "3000"),
        ]))
        .unwrap();
        assert_eq!(config.gemini.api_key, "abc");
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.base_url, "http://localhost:9000/models");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_port_takes_precedence_and_is_validated() {
        let config =
            Config::from_lookup(lookup_from(&[("PORT", "9090"), ("API_PORT", "3000")])).unwrap();
        assert_eq!(config.port, 9090);

        let err = Config::from_lookup(lookup_from(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, SplitError::ConfigError(_)));
    }
}
