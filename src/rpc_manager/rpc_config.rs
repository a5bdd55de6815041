use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::rpc_errors::RetryPolicy;
use crate::config::ConfigError;

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// `[rpc]` section: endpoint URLs (primary first) and retry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Ranked endpoint URLs; the first entry is the primary
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    /// Attempts on one endpoint before rotating
    #[serde(default = "default_max_retries")]
    pub max_retries_per_endpoint: u32,

    /// Backoff base in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Bounded wait applied to every endpoint operation
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long a failing endpoint is deprioritized
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Background probe interval; 0 disables probing
    #[serde(default)]
    pub probe_interval_ms: u64,
}

fn default_urls() -> Vec<String> {
    vec![DEFAULT_RPC_URL.to_string()]
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    8000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            max_retries_per_endpoint: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_factor: default_jitter_factor(),
            request_timeout_ms: default_request_timeout_ms(),
            cooldown_ms: default_cooldown_ms(),
            probe_interval_ms: 0,
        }
    }
}

impl RpcConfig {
    /// Load configuration from environment variables.
    /// Expected format: RPC_URLS=url1,url2,url3 (or a single RPC_URL)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            urls: Vec::new(),
            ..Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;

        if config.urls.is_empty() {
            return Err(ConfigError::MissingEnvVar("RPC_URLS".to_string()));
        }
        Ok(config)
    }

    /// Overlay RPC_URLS / RPC_URL / RPC_MAX_RETRIES from `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let urls: Vec<String> = lookup("RPC_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if !urls.is_empty() {
            self.urls = urls;
        } else if let Some(url) = lookup("RPC_URL").filter(|u| !u.trim().is_empty()) {
            self.urls = vec![url.trim().to_string()];
        }

        if let Some(raw) = lookup("RPC_MAX_RETRIES") {
            self.max_retries_per_endpoint = raw.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("RPC_MAX_RETRIES is not a number: {}", raw))
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::Validation(
                "At least one RPC endpoint must be configured".to_string(),
            ));
        }

        let mut seen_urls = std::collections::HashSet::new();
        for url in &self.urls {
            if !seen_urls.insert(url) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate RPC URL: {}",
                    redact_url(url)
                )));
            }

            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "Invalid URL format: {}",
                    redact_url(url)
                )));
            }
        }

        if self.max_retries_per_endpoint == 0 {
            return Err(ConfigError::Validation(
                "max_retries_per_endpoint must be > 0".to_string(),
            ));
        }

        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Validation(
                "backoff_base_ms must not exceed backoff_max_ms".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Validation(
                "jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries_per_endpoint,
            base_delay_ms: self.backoff_base_ms,
            max_delay_ms: self.backoff_max_ms,
            jitter_factor: self.jitter_factor,
            multiplier: 2.0,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_ms > 0).then(|| Duration::from_millis(self.probe_interval_ms))
    }
}

/// Strip credentials from an endpoint URL before it reaches a log line.
/// Keeps scheme, host and port; any path, query or userinfo becomes `/***`.
pub fn redact_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown");
            let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            let has_secret = url.query().is_some()
                || !url.path().trim_matches('/').is_empty()
                || !url.username().is_empty()
                || url.password().is_some();

            if has_secret {
                format!("{}://{}{}/***", url.scheme(), host, port)
            } else {
                format!("{}://{}{}", url.scheme(), host, port)
            }
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_urls_take_precedence_over_single_url() {
        let mut config = RpcConfig::default();
        config
            .apply_env_with(lookup(&[
                ("RPC_URLS", "https://a.example, https://b.example,,"),
                ("RPC_URL", "https://ignored.example"),
                ("RPC_MAX_RETRIES", "2"),
            ]))
            .unwrap();

        assert_eq!(config.urls, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.max_retries_per_endpoint, 2);
    }

    #[test]
    fn test_env_single_url_fallback() {
        let mut config = RpcConfig::default();
        config
            .apply_env_with(lookup(&[("RPC_URL", "https://single.example")]))
            .unwrap();
        assert_eq!(config.urls, vec!["https://single.example"]);
    }

    #[test]
    fn test_env_bad_retry_count_is_rejected() {
        let mut config = RpcConfig::default();
        let err = config
            .apply_env_with(lookup(&[("RPC_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_scheme() {
        let mut config = RpcConfig::default();
        config.urls = vec!["https://a.example".to_string(), "https://a.example".to_string()];
        assert!(config.validate().is_err());

        config.urls = vec!["ws://a.example".to_string()];
        assert!(config.validate().is_err());

        config.urls = vec!["https://a.example".to_string()];
        assert!(config.validate().is_ok());

        config.max_retries_per_endpoint = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://mainnet.helius-rpc.com/?api-key=secret"),
            "https://mainnet.helius-rpc.com/***"
        );
        assert_eq!(
            redact_url("https://example.quiknode.pro/abcdef0123456789/"),
            "https://example.quiknode.pro/***"
        );
        assert_eq!(
            redact_url("http://127.0.0.1:8899"),
            "http://127.0.0.1:8899"
        );
        assert_eq!(redact_url("not a url"), "<invalid-url>");
    }
}
