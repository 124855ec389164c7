//! Challenge configuration persistence with tiered fallback.
//!
//! Each scope (one per host, plus one global) maps to exactly one Redis
//! hash, so the one-record-per-scope invariant holds structurally.
//! Partial updates are written with HSET on only the provided fields:
//! the field-level merge is atomic, so two concurrent first-time saves
//! for the same host can neither create a second record nor erase each
//! other's fields.

use anyhow::Result;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::str::FromStr;

use bastion_common::constants::redis_keys;
use bastion_common::{ChallengeConfig, ChallengeConfigUpdate};

/// Challenge configuration store
pub struct ConfigStore;

impl ConfigStore {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the effective config for a scope: the host record, else
    /// the global record, else the built-in safe default. Absence never
    /// fails; a genuine store error propagates to the caller.
    pub async fn effective(
        &self,
        redis: &mut ConnectionManager,
        host_id: Option<i64>,
    ) -> Result<ChallengeConfig> {
        if host_id.is_some() {
            if let Some(config) = self.fetch(redis, host_id).await? {
                return Ok(config);
            }
        }
        if let Some(config) = self.fetch(redis, None).await? {
            return Ok(config);
        }
        Ok(ChallengeConfig::fallback(host_id))
    }

    /// Fetch the stored record for exactly this scope, if any
    pub async fn fetch(
        &self,
        redis: &mut ConnectionManager,
        scope: Option<i64>,
    ) -> Result<Option<ChallengeConfig>> {
        let map: HashMap<String, String> = redis.hgetall(config_key(scope)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(config_from_map(scope, &map)))
    }

    /// Merge a partial update into the scope's record, creating it on
    /// first write. Blank key material is skipped, so a previously
    /// stored secret survives an update that omits it.
    pub async fn upsert(
        &self,
        redis: &mut ConnectionManager,
        scope: Option<i64>,
        update: &ChallengeConfigUpdate,
    ) -> Result<ChallengeConfig> {
        let pairs = update_to_pairs(update);
        if !pairs.is_empty() {
            let _: () = redis.hset_multiple(config_key(scope), &pairs).await?;
        }

        tracing::info!(host = ?scope, fields = pairs.len(), "Challenge config updated");

        match self.fetch(redis, scope).await? {
            Some(config) => Ok(config),
            None => Ok(ChallengeConfig::fallback(scope)),
        }
    }

    /// Remove the scope's record; resolution falls through to the next
    /// tier afterwards.
    pub async fn delete(&self, redis: &mut ConnectionManager, scope: Option<i64>) -> Result<bool> {
        let removed: i64 = redis.del(config_key(scope)).await?;
        if removed > 0 {
            tracing::info!(host = ?scope, "Challenge config removed");
        }
        Ok(removed > 0)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn config_key(scope: Option<i64>) -> String {
    match scope {
        Some(id) => format!("{}host:{}", redis_keys::CONFIG_PREFIX, id),
        None => format!("{}global", redis_keys::CONFIG_PREFIX),
    }
}

mod fields {
    pub const ENABLED: &str = "enabled";
    pub const CHALLENGE_TYPE: &str = "challenge_type";
    pub const SITE_KEY: &str = "site_key";
    pub const SECRET_KEY: &str = "secret_key";
    pub const TOKEN_VALIDITY: &str = "token_validity_secs";
    pub const MIN_SCORE: &str = "min_score";
    pub const SCOPE: &str = "scope";
    pub const PAGE_TITLE: &str = "page_title";
    pub const PAGE_MESSAGE: &str = "page_message";
    pub const THEME: &str = "theme";
    pub const LANGUAGE: &str = "language";
}

/// Encode only the fields present in the update. Blank site/secret keys
/// are dropped here so they can never overwrite a stored value.
fn update_to_pairs(update: &ChallengeConfigUpdate) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();

    if let Some(v) = update.enabled {
        pairs.push((fields::ENABLED, v.to_string()));
    }
    if let Some(v) = update.challenge_type {
        pairs.push((fields::CHALLENGE_TYPE, v.as_str().to_string()));
    }
    if let Some(v) = &update.site_key {
        if !v.is_empty() {
            pairs.push((fields::SITE_KEY, v.clone()));
        }
    }
    if let Some(v) = &update.secret_key {
        if !v.is_empty() {
            pairs.push((fields::SECRET_KEY, v.clone()));
        }
    }
    if let Some(v) = update.token_validity_secs {
        pairs.push((fields::TOKEN_VALIDITY, v.to_string()));
    }
    if let Some(v) = update.min_score {
        pairs.push((fields::MIN_SCORE, v.to_string()));
    }
    if let Some(v) = update.scope {
        pairs.push((fields::SCOPE, v.as_str().to_string()));
    }
    if let Some(v) = &update.page_title {
        pairs.push((fields::PAGE_TITLE, v.clone()));
    }
    if let Some(v) = &update.page_message {
        pairs.push((fields::PAGE_MESSAGE, v.clone()));
    }
    if let Some(v) = update.theme {
        pairs.push((fields::THEME, v.as_str().to_string()));
    }
    if let Some(v) = update.language {
        pairs.push((fields::LANGUAGE, v.as_str().to_string()));
    }

    pairs
}

/// Decode a stored hash back into a config. Missing or unparsable fields
/// take the built-in defaults, so a partially written record still
/// resolves.
fn config_from_map(scope: Option<i64>, map: &HashMap<String, String>) -> ChallengeConfig {
    let defaults = ChallengeConfig::fallback(scope);

    ChallengeConfig {
        host_id: scope,
        enabled: map
            .get(fields::ENABLED)
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.enabled),
        challenge_type: map
            .get(fields::CHALLENGE_TYPE)
            .and_then(|v| FromStr::from_str(v).ok())
            .unwrap_or(defaults.challenge_type),
        site_key: map
            .get(fields::SITE_KEY)
            .cloned()
            .unwrap_or(defaults.site_key),
        secret_key: map
            .get(fields::SECRET_KEY)
            .cloned()
            .unwrap_or(defaults.secret_key),
        token_validity_secs: map
            .get(fields::TOKEN_VALIDITY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.token_validity_secs),
        min_score: map
            .get(fields::MIN_SCORE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_score),
        scope: map
            .get(fields::SCOPE)
            .and_then(|v| FromStr::from_str(v).ok())
            .unwrap_or(defaults.scope),
        page_title: map
            .get(fields::PAGE_TITLE)
            .cloned()
            .unwrap_or(defaults.page_title),
        page_message: map
            .get(fields::PAGE_MESSAGE)
            .cloned()
            .unwrap_or(defaults.page_message),
        theme: map
            .get(fields::THEME)
            .and_then(|v| FromStr::from_str(v).ok())
            .unwrap_or(defaults.theme),
        language: map
            .get(fields::LANGUAGE)
            .and_then(|v| FromStr::from_str(v).ok())
            .unwrap_or(defaults.language),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_common::{ChallengeTheme, ChallengeType, EnforcementScope};

    fn apply_pairs(map: &mut HashMap<String, String>, pairs: &[(&'static str, String)]) {
        for (field, value) in pairs {
            map.insert((*field).to_string(), value.clone());
        }
    }

    #[test]
    fn blank_key_material_is_never_written() {
        let update = ChallengeConfigUpdate {
            enabled: Some(true),
            site_key: Some(String::new()),
            secret_key: Some(String::new()),
            ..Default::default()
        };

        let pairs = update_to_pairs(&update);
        assert!(pairs.iter().all(|(f, _)| *f != fields::SITE_KEY));
        assert!(pairs.iter().all(|(f, _)| *f != fields::SECRET_KEY));
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn stored_fields_round_trip() {
        let update = ChallengeConfigUpdate {
            enabled: Some(true),
            challenge_type: Some(ChallengeType::Turnstile),
            site_key: Some("site-key".to_string()),
            secret_key: Some("secret-key".to_string()),
            token_validity_secs: Some(7_200),
            min_score: Some(0.7),
            scope: Some(EnforcementScope::BotFilter),
            page_title: Some("Hold on".to_string()),
            page_message: Some("Checking your browser".to_string()),
            theme: Some(ChallengeTheme::Dark),
            language: None,
        };

        let mut map = HashMap::new();
        apply_pairs(&mut map, &update_to_pairs(&update));
        let config = config_from_map(Some(5), &map);

        assert_eq!(config.host_id, Some(5));
        assert!(config.enabled);
        assert_eq!(config.challenge_type, ChallengeType::Turnstile);
        assert_eq!(config.site_key, "site-key");
        assert_eq!(config.secret_key, "secret-key");
        assert_eq!(config.token_validity_secs, 7_200);
        assert_eq!(config.min_score, 0.7);
        assert_eq!(config.scope, EnforcementScope::BotFilter);
        assert_eq!(config.theme, ChallengeTheme::Dark);
    }

    #[test]
    fn partial_record_resolves_with_defaults() {
        let mut map = HashMap::new();
        map.insert(fields::ENABLED.to_string(), "true".to_string());

        let config = config_from_map(None, &map);
        assert!(config.enabled);
        assert_eq!(config.challenge_type, ChallengeType::RecaptchaV2);
        assert_eq!(config.token_validity_secs, 86_400);
        assert_eq!(config.min_score, 0.5);
    }

    #[test]
    fn concurrent_first_time_saves_merge_without_losing_either_writer() {
        // Simulates two HSETs racing on the same fresh key: the field
        // merge keeps both writers' disjoint fields regardless of order.
        let writer_a = ChallengeConfigUpdate {
            secret_key: Some("a-secret".to_string()),
            ..Default::default()
        };
        let writer_b = ChallengeConfigUpdate {
            enabled: Some(true),
            min_score: Some(0.9),
            ..Default::default()
        };

        for (first, second) in [(&writer_a, &writer_b), (&writer_b, &writer_a)] {
            let mut map = HashMap::new();
            apply_pairs(&mut map, &update_to_pairs(first));
            apply_pairs(&mut map, &update_to_pairs(second));

            let config = config_from_map(Some(1), &map);
            assert_eq!(config.secret_key, "a-secret");
            assert!(config.enabled);
            assert_eq!(config.min_score, 0.9);
        }
    }

    #[test]
    fn scope_keys_are_distinct() {
        assert_eq!(config_key(None), "challenge:cfg:global");
        assert_eq!(config_key(Some(12)), "challenge:cfg:host:12");
        assert_ne!(config_key(None), config_key(Some(0)));
    }
}
