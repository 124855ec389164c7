//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::gate::ChallengeGate;
use crate::store::{ConfigStore, EventLog, TokenStore};
use crate::verifier::CaptchaVerifier;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Redis connection manager (auto-reconnecting)
    pub redis: ConnectionManager,

    /// Challenge configuration store
    pub configs: Arc<ConfigStore>,

    /// Bypass token store
    pub tokens: Arc<TokenStore>,

    /// Append-only challenge event log
    pub events: Arc<EventLog>,

    /// Third-party CAPTCHA verifier
    pub verifier: Arc<CaptchaVerifier>,

    /// Challenge decision engine
    pub gate: Arc<ChallengeGate>,
}

impl AppState {
    /// Create new application state, connecting to Redis
    pub async fn new(config: AppConfig) -> Result<Self> {
        // Connect to Redis with connection manager (handles reconnection)
        let client = redis::Client::open(config.redis_url.as_str())
            .context("Failed to create Redis client")?;

        let redis = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        // Initialize services
        let configs = Arc::new(ConfigStore::new());
        let tokens = Arc::new(TokenStore::new(config.purge.retention_grace_secs));
        let events = Arc::new(EventLog::new());
        let verifier = Arc::new(
            CaptchaVerifier::new(config.verifier.timeout_secs)
                .context("Failed to build the verification HTTP client")?,
        );
        let gate = Arc::new(ChallengeGate::new(
            configs.clone(),
            tokens.clone(),
            events.clone(),
            verifier.clone(),
        ));

        Ok(Self {
            config,
            redis,
            configs,
            tokens,
            events,
            verifier,
            gate,
        })
    }
}
