//! Gateway configuration.

use std::time::Duration;

use hermes_core::{HermesError, HermesResult};
use serde::{Deserialize, Serialize};

fn default_timeout_secs() -> u64 {
    30
}

fn default_revalidation_ttl_secs() -> u64 {
    5
}

fn default_copy_page_size() -> usize {
    100
}

/// Static configuration for the upstream gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the peer server.
    pub base_url: String,
    /// Request timeout for upstream calls, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Forward requests automatically when no explicit flag is present.
    #[serde(default)]
    pub auto_forward: bool,
    /// How long a recently validated `(tag, view)` pair is served without a
    /// network round-trip, in seconds.
    #[serde(default = "default_revalidation_ttl_secs")]
    pub revalidation_ttl_secs: u64,
    /// Page size used when copying a subject's transactional records.
    #[serde(default = "default_copy_page_size")]
    pub copy_page_size: usize,
}

impl GatewayConfig {
    /// Creates a configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            auto_forward: false,
            revalidation_ttl_secs: default_revalidation_ttl_secs(),
            copy_page_size: default_copy_page_size(),
        }
    }

    /// Enables auto-forwarding.
    #[must_use]
    pub fn with_auto_forward(mut self) -> Self {
        self.auto_forward = true;
        self
    }

    /// Returns the upstream request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the revalidation window.
    #[must_use]
    pub fn revalidation_ttl(&self) -> Duration {
        Duration::from_secs(self.revalidation_ttl_secs)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> HermesResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(HermesError::validation(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.copy_page_size == 0 {
            return Err(HermesError::validation("copy_page_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::new("https://peer.example.org");
        assert!(config.validate().is_ok());
        assert!(!config.auto_forward);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.copy_page_size, 100);
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = GatewayConfig::new("peer.example.org");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialization_fills_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"base_url": "http://peer"}"#).expect("deserialize");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.revalidation_ttl_secs, 5);
    }
}
