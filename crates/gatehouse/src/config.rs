//! Configuration management for Gatehouse.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use bastion_common::PageLanguage;
use bastion_common::constants::{
    DEFAULT_LISTEN_ADDR, DEFAULT_PURGE_INTERVAL_SECS, DEFAULT_REDIS_URL,
    DEFAULT_VERIFY_TIMEOUT_SECS, TOKEN_RETENTION_GRACE_SECS,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Fallback page language when a host preference is `auto` and the
    /// browser offers nothing usable
    #[serde(default = "default_language")]
    pub default_language: PageLanguage,

    /// Provider verification configuration
    #[serde(default)]
    pub verifier: VerifierConfig,

    /// Token purge sweep configuration
    #[serde(default)]
    pub purge: PurgeConfig,
}

/// Provider verification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    /// Siteverify request timeout in seconds. Bounded so the nginx
    /// auth_request subrequest never hangs on a slow provider.
    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_verify_timeout(),
        }
    }
}

/// Token purge sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PurgeConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_purge_interval")]
    pub interval_secs: u64,

    /// How long an expired token record is retained before deletion
    #[serde(default = "default_retention_grace")]
    pub retention_grace_secs: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_purge_interval(),
            retention_grace_secs: default_retention_grace(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}
fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}
fn default_language() -> PageLanguage {
    PageLanguage::En
}
fn default_verify_timeout() -> u64 {
    DEFAULT_VERIFY_TIMEOUT_SECS
}
fn default_purge_interval() -> u64 {
    DEFAULT_PURGE_INTERVAL_SECS
}
fn default_retention_grace() -> u64 {
    TOKEN_RETENTION_GRACE_SECS
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            default_language: default_language(),
            verifier: VerifierConfig::default(),
            purge: PurgeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.verifier.timeout_secs, 8);
        assert_eq!(config.purge.interval_secs, 3_600);
        assert_eq!(config.default_language, PageLanguage::En);
    }
}
