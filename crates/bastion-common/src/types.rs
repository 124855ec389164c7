//! Core types shared across Bastion components.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::GateError;
use crate::constants::{DEFAULT_MIN_SCORE, DEFAULT_TOKEN_VALIDITY_SECS};

/// Third-party CAPTCHA provider wired into the challenge page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    #[default]
    RecaptchaV2,
    RecaptchaV3,
    Hcaptcha,
    Turnstile,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecaptchaV2 => "recaptcha_v2",
            Self::RecaptchaV3 => "recaptcha_v3",
            Self::Hcaptcha => "hcaptcha",
            Self::Turnstile => "turnstile",
        }
    }

    /// Score-based providers additionally report a float in [0, 1]
    pub fn is_score_based(&self) -> bool {
        matches!(self, Self::RecaptchaV3)
    }
}

impl FromStr for ChallengeType {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recaptcha_v2" => Ok(Self::RecaptchaV2),
            "recaptcha_v3" => Ok(Self::RecaptchaV3),
            "hcaptcha" => Ok(Self::Hcaptcha),
            "turnstile" => Ok(Self::Turnstile),
            other => Err(GateError::InvalidInput(format!(
                "unknown challenge type: {other}"
            ))),
        }
    }
}

/// Which restriction layers the challenge is enforced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementScope {
    BotFilter,
    GeoRestriction,
    #[default]
    Both,
}

impl EnforcementScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotFilter => "bot_filter",
            Self::GeoRestriction => "geo_restriction",
            Self::Both => "both",
        }
    }

    /// Whether a challenge triggered for `reason` falls under this scope
    pub fn covers(&self, reason: ChallengeReason) -> bool {
        match self {
            Self::Both => true,
            Self::BotFilter => reason == ChallengeReason::BotFilter,
            Self::GeoRestriction => reason == ChallengeReason::GeoRestriction,
        }
    }
}

impl FromStr for EnforcementScope {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot_filter" => Ok(Self::BotFilter),
            "geo_restriction" => Ok(Self::GeoRestriction),
            "both" => Ok(Self::Both),
            other => Err(GateError::InvalidInput(format!(
                "unknown enforcement scope: {other}"
            ))),
        }
    }
}

/// Why a challenge was triggered for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeReason {
    BotFilter,
    #[default]
    GeoRestriction,
}

impl ChallengeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotFilter => "bot_filter",
            Self::GeoRestriction => "geo_restriction",
        }
    }
}

impl FromStr for ChallengeReason {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot_filter" => Ok(Self::BotFilter),
            "geo_restriction" => Ok(Self::GeoRestriction),
            other => Err(GateError::InvalidInput(format!(
                "unknown challenge reason: {other}"
            ))),
        }
    }
}

/// Challenge page visual theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeTheme {
    #[default]
    Light,
    Dark,
}

impl ChallengeTheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl FromStr for ChallengeTheme {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(GateError::InvalidInput(format!("unknown theme: {other}"))),
        }
    }
}

/// Challenge page language preference. `Auto` negotiates from the
/// browser's Accept-Language header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageLanguage {
    #[default]
    Auto,
    En,
    De,
}

impl PageLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::En => "en",
            Self::De => "de",
        }
    }
}

impl FromStr for PageLanguage {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "en" => Ok(Self::En),
            "de" => Ok(Self::De),
            other => Err(GateError::InvalidInput(format!("unknown language: {other}"))),
        }
    }
}

/// Effective challenge settings for one scope.
///
/// `host_id = None` is the global record applying to every host without
/// its own override. At most one record exists per scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    pub host_id: Option<i64>,
    pub enabled: bool,
    pub challenge_type: ChallengeType,
    /// Public widget key, safe to embed in HTML
    pub site_key: String,
    /// Server-side only; never serialized into API responses
    pub secret_key: String,
    pub token_validity_secs: u64,
    /// Minimum acceptance score for score-based providers, in [0, 1]
    pub min_score: f64,
    pub scope: EnforcementScope,
    pub page_title: String,
    pub page_message: String,
    pub theme: ChallengeTheme,
    pub language: PageLanguage,
}

impl ChallengeConfig {
    /// Built-in safe default used when neither a host nor a global record
    /// exists. Resolution never hard-fails on absence.
    pub fn fallback(host_id: Option<i64>) -> Self {
        Self {
            host_id,
            enabled: false,
            challenge_type: ChallengeType::RecaptchaV2,
            site_key: String::new(),
            secret_key: String::new(),
            token_validity_secs: DEFAULT_TOKEN_VALIDITY_SECS,
            min_score: DEFAULT_MIN_SCORE,
            scope: EnforcementScope::Both,
            page_title: "Security check".to_string(),
            page_message: "Please confirm you are human to continue.".to_string(),
            theme: ChallengeTheme::Light,
            language: PageLanguage::Auto,
        }
    }

    pub fn has_secret_key(&self) -> bool {
        !self.secret_key.is_empty()
    }
}

/// Partial configuration update. Only provided fields are written; a blank
/// or omitted key never erases a previously stored secret or site key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeConfigUpdate {
    pub enabled: Option<bool>,
    pub challenge_type: Option<ChallengeType>,
    pub site_key: Option<String>,
    pub secret_key: Option<String>,
    pub token_validity_secs: Option<u64>,
    pub min_score: Option<f64>,
    pub scope: Option<EnforcementScope>,
    pub page_title: Option<String>,
    pub page_message: Option<String>,
    pub theme: Option<ChallengeTheme>,
    pub language: Option<PageLanguage>,
}

impl ChallengeConfigUpdate {
    /// Merge this update onto an existing config
    pub fn apply(&self, mut config: ChallengeConfig) -> ChallengeConfig {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.challenge_type {
            config.challenge_type = v;
        }
        if let Some(v) = &self.site_key {
            if !v.is_empty() {
                config.site_key = v.clone();
            }
        }
        if let Some(v) = &self.secret_key {
            if !v.is_empty() {
                config.secret_key = v.clone();
            }
        }
        if let Some(v) = self.token_validity_secs {
            config.token_validity_secs = v;
        }
        if let Some(v) = self.min_score {
            config.min_score = v;
        }
        if let Some(v) = self.scope {
            config.scope = v;
        }
        if let Some(v) = &self.page_title {
            config.page_title = v.clone();
        }
        if let Some(v) = &self.page_message {
            config.page_message = v.clone();
        }
        if let Some(v) = self.theme {
            config.theme = v;
        }
        if let Some(v) = self.language {
            config.language = v;
        }
        config
    }
}

/// Outward-facing config representation. The secret is redacted to a
/// boolean "is one stored" flag.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeConfigView {
    pub host_id: Option<i64>,
    pub enabled: bool,
    pub challenge_type: ChallengeType,
    pub site_key: String,
    pub has_secret_key: bool,
    pub token_validity_secs: u64,
    pub min_score: f64,
    pub scope: EnforcementScope,
    pub page_title: String,
    pub page_message: String,
    pub theme: ChallengeTheme,
    pub language: PageLanguage,
}

impl From<ChallengeConfig> for ChallengeConfigView {
    fn from(config: ChallengeConfig) -> Self {
        Self {
            host_id: config.host_id,
            enabled: config.enabled,
            challenge_type: config.challenge_type,
            site_key: config.site_key,
            has_secret_key: !config.secret_key.is_empty(),
            token_validity_secs: config.token_validity_secs,
            min_score: config.min_score,
            scope: config.scope,
            page_title: config.page_title,
            page_message: config.page_message,
            theme: config.theme,
            language: config.language,
        }
    }
}

/// One issued bypass credential. Only the digest of the opaque token value
/// is kept; the raw value leaves the store exactly once at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeToken {
    pub id: String,
    /// None = usable across all hosts
    pub host_id: Option<i64>,
    /// Hex SHA-256 digest of the raw token value
    pub token_hash: String,
    pub client_ip: String,
    pub user_agent: String,
    pub reason: ChallengeReason,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub use_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl ChallengeToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Validity is computed, never a stored flag: not revoked and not yet
    /// past expiry.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }

    /// Full usability predicate for a presenting client: active, bound to
    /// the issuing IP, and scoped to the requesting host (a token without
    /// a host applies everywhere).
    pub fn usable_by(&self, client_ip: &str, host_id: Option<i64>, now: DateTime<Utc>) -> bool {
        self.is_active_at(now)
            && self.client_ip == client_ip
            && (self.host_id.is_none() || self.host_id == host_id)
    }

    /// Idempotent: an already-revoked token is left untouched
    pub fn revoke(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.revoked {
            return;
        }
        self.revoked = true;
        self.revoked_at = Some(now);
        self.revoked_reason = Some(reason.to_string());
    }

    /// True once the record has outlived its post-expiry forensic window
    pub fn past_retention(&self, grace_secs: u64, now: DateTime<Utc>) -> bool {
        now >= self.expires_at + Duration::seconds(grace_secs as i64)
    }
}

/// Result of one challenge interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeOutcome {
    Presented,
    Passed,
    Failed,
    Expired,
}

/// Append-only record of one challenge event. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeEvent {
    /// Random id so identical events never collapse in the log
    pub event_id: String,
    pub host_id: Option<i64>,
    pub client_ip: String,
    pub user_agent: String,
    pub outcome: ChallengeOutcome,
    pub reason: ChallengeReason,
    pub score: Option<f64>,
    pub solve_time_ms: Option<u64>,
    pub at: DateTime<Utc>,
}

impl ChallengeEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Aggregate challenge statistics over a trailing window
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChallengeStats {
    pub total: u64,
    pub presented: u64,
    pub passed: u64,
    pub failed: u64,
    pub expired: u64,
    pub active_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_solve_ms: Option<u64>,
    pub window_hours: i64,
}

impl ChallengeStats {
    /// Aggregate a window of events. `active_tokens` is filled in by the
    /// caller from the token store.
    pub fn from_events(events: &[ChallengeEvent], window_hours: i64) -> Self {
        let mut stats = Self {
            window_hours,
            ..Self::default()
        };

        let mut score_sum = 0.0;
        let mut score_count = 0u64;
        let mut solve_sum = 0u64;
        let mut solve_count = 0u64;

        for event in events {
            stats.total += 1;
            match event.outcome {
                ChallengeOutcome::Presented => stats.presented += 1,
                ChallengeOutcome::Passed => stats.passed += 1,
                ChallengeOutcome::Failed => stats.failed += 1,
                ChallengeOutcome::Expired => stats.expired += 1,
            }
            if let Some(score) = event.score {
                score_sum += score;
                score_count += 1;
            }
            if let Some(ms) = event.solve_time_ms {
                solve_sum += ms;
                solve_count += 1;
            }
        }

        if score_count > 0 {
            stats.average_score = Some(score_sum / score_count as f64);
        }
        if solve_count > 0 {
            stats.average_solve_ms = Some(solve_sum / solve_count);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_at(issued: DateTime<Utc>, validity_secs: i64) -> ChallengeToken {
        ChallengeToken {
            id: "tok-1".to_string(),
            host_id: Some(7),
            token_hash: "ab".repeat(32),
            client_ip: "203.0.113.9".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            reason: ChallengeReason::BotFilter,
            issued_at: issued,
            expires_at: issued + Duration::seconds(validity_secs),
            use_count: 0,
            last_used_at: None,
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
        }
    }

    #[test]
    fn token_valid_just_before_expiry_and_invalid_just_after() {
        let issued = Utc::now();
        let token = token_at(issued, 600);

        assert!(token.usable_by("203.0.113.9", Some(7), issued + Duration::seconds(599)));
        assert!(!token.usable_by("203.0.113.9", Some(7), issued + Duration::seconds(601)));
    }

    #[test]
    fn token_is_bound_to_the_issuing_ip() {
        let issued = Utc::now();
        let token = token_at(issued, 600);

        assert!(token.usable_by("203.0.113.9", Some(7), issued));
        assert!(!token.usable_by("198.51.100.1", Some(7), issued));
    }

    #[test]
    fn host_scoped_token_rejects_other_hosts_but_global_token_applies_everywhere() {
        let issued = Utc::now();
        let scoped = token_at(issued, 600);
        assert!(scoped.usable_by("203.0.113.9", Some(7), issued));
        assert!(!scoped.usable_by("203.0.113.9", Some(8), issued));
        assert!(!scoped.usable_by("203.0.113.9", None, issued));

        let global = ChallengeToken {
            host_id: None,
            ..token_at(issued, 600)
        };
        assert!(global.usable_by("203.0.113.9", Some(8), issued));
        assert!(global.usable_by("203.0.113.9", None, issued));
    }

    #[test]
    fn revocation_invalidates_immediately_and_is_idempotent() {
        let issued = Utc::now();
        let mut token = token_at(issued, 3600);
        assert!(token.usable_by("203.0.113.9", Some(7), issued));

        token.revoke("admin action", issued + Duration::seconds(1));
        assert!(!token.usable_by("203.0.113.9", Some(7), issued + Duration::seconds(2)));
        let first_at = token.revoked_at;
        let first_reason = token.revoked_reason.clone();

        token.revoke("second attempt", issued + Duration::seconds(60));
        assert_eq!(token.revoked_at, first_at);
        assert_eq!(token.revoked_reason, first_reason);
    }

    #[test]
    fn retention_window_outlives_expiry() {
        let issued = Utc::now();
        let token = token_at(issued, 60);
        let grace = 3_600u64;

        let just_expired = issued + Duration::seconds(61);
        assert!(token.is_expired_at(just_expired));
        assert!(!token.past_retention(grace, just_expired));
        assert!(token.past_retention(grace, issued + Duration::seconds(60 + 3_601)));
    }

    #[test]
    fn update_preserves_stored_keys_when_blank() {
        let mut stored = ChallengeConfig::fallback(Some(1));
        stored.site_key = "site-abc".to_string();
        stored.secret_key = "secret-xyz".to_string();

        let update = ChallengeConfigUpdate {
            enabled: Some(true),
            site_key: Some(String::new()),
            secret_key: Some(String::new()),
            ..Default::default()
        };

        let merged = update.apply(stored);
        assert!(merged.enabled);
        assert_eq!(merged.site_key, "site-abc");
        assert_eq!(merged.secret_key, "secret-xyz");
    }

    #[test]
    fn update_replaces_keys_when_provided() {
        let mut stored = ChallengeConfig::fallback(None);
        stored.secret_key = "old".to_string();

        let update = ChallengeConfigUpdate {
            secret_key: Some("new".to_string()),
            ..Default::default()
        };

        assert_eq!(update.apply(stored).secret_key, "new");
    }

    #[test]
    fn view_redacts_the_secret() {
        let mut config = ChallengeConfig::fallback(Some(2));
        config.secret_key = "super-secret".to_string();

        let view = ChallengeConfigView::from(config);
        assert!(view.has_secret_key);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("super-secret"));
    }

    #[test]
    fn scope_covers_matching_reasons() {
        assert!(EnforcementScope::Both.covers(ChallengeReason::BotFilter));
        assert!(EnforcementScope::Both.covers(ChallengeReason::GeoRestriction));
        assert!(EnforcementScope::BotFilter.covers(ChallengeReason::BotFilter));
        assert!(!EnforcementScope::BotFilter.covers(ChallengeReason::GeoRestriction));
        assert!(!EnforcementScope::GeoRestriction.covers(ChallengeReason::BotFilter));
    }

    #[test]
    fn fallback_config_is_disabled_with_safe_defaults() {
        let config = ChallengeConfig::fallback(None);
        assert!(!config.enabled);
        assert_eq!(config.challenge_type, ChallengeType::RecaptchaV2);
        assert_eq!(config.token_validity_secs, 86_400);
        assert_eq!(config.min_score, 0.5);
        assert_eq!(config.scope, EnforcementScope::Both);
        assert_eq!(config.theme, ChallengeTheme::Light);
        assert!(!config.has_secret_key());
    }

    #[test]
    fn only_recaptcha_v3_is_score_based() {
        assert!(ChallengeType::RecaptchaV3.is_score_based());
        assert!(!ChallengeType::RecaptchaV2.is_score_based());
        assert!(!ChallengeType::Hcaptcha.is_score_based());
        assert!(!ChallengeType::Turnstile.is_score_based());
    }

    #[test]
    fn stats_aggregate_outcomes_and_averages() {
        let now = Utc::now();
        let base = ChallengeEvent {
            event_id: "e".to_string(),
            host_id: None,
            client_ip: "203.0.113.9".to_string(),
            user_agent: "ua".to_string(),
            outcome: ChallengeOutcome::Presented,
            reason: ChallengeReason::BotFilter,
            score: None,
            solve_time_ms: None,
            at: now,
        };

        let events = vec![
            base.clone(),
            ChallengeEvent {
                outcome: ChallengeOutcome::Passed,
                score: Some(0.9),
                solve_time_ms: Some(4_000),
                ..base.clone()
            },
            ChallengeEvent {
                outcome: ChallengeOutcome::Passed,
                score: Some(0.7),
                solve_time_ms: Some(2_000),
                ..base.clone()
            },
            ChallengeEvent {
                outcome: ChallengeOutcome::Failed,
                ..base.clone()
            },
        ];

        let stats = ChallengeStats::from_events(&events, 24);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.presented, 1);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.expired, 0);
        assert!((stats.average_score.unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(stats.average_solve_ms, Some(3_000));
    }

    #[test]
    fn event_json_round_trip() {
        let event = ChallengeEvent {
            event_id: "ev-42".to_string(),
            host_id: Some(3),
            client_ip: "203.0.113.9".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            outcome: ChallengeOutcome::Passed,
            reason: ChallengeReason::GeoRestriction,
            score: Some(0.9),
            solve_time_ms: Some(1_200),
            at: Utc::now(),
        };

        let parsed = ChallengeEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed.event_id, "ev-42");
        assert_eq!(parsed.outcome, ChallengeOutcome::Passed);
        assert_eq!(parsed.score, Some(0.9));
    }
}
