//! Challenge decision engine.
//!
//! Drives the per-(client, host, reason) state machine behind the
//! validate and verify endpoints:
//!
//! ```text
//! Unchallenged → Presented → {Passed, Failed}
//!                              Passed → bypassed until token expiry,
//!                                       revalidated on every request
//! ```
//!
//! The engine keeps no state of its own; every decision reloads what it
//! needs from the store.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use bastion_common::{ChallengeEvent, ChallengeOutcome, ChallengeReason, GateError};

use crate::bypass;
use crate::store::{ConfigStore, EventLog, TokenStore};
use crate::verifier::CaptchaVerifier;

/// Inbound data for one validate-token decision
pub struct ValidateRequest<'a> {
    pub host_id: Option<i64>,
    pub client_ip: &'a str,
    pub user_agent: &'a str,
    /// Trusted edge header value, if present
    pub geo_header: Option<&'a str>,
    /// Raw bypass token from header or cookie, if any
    pub token: Option<&'a str>,
    pub reason: ChallengeReason,
}

/// Outcome the edge proxy maps onto auth_request semantics:
/// 2xx = allow, non-2xx = deny and redirect to the challenge page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny,
}

/// Inbound data for one CAPTCHA-solve verification
pub struct SolveRequest<'a> {
    pub host_id: Option<i64>,
    pub client_ip: &'a str,
    pub user_agent: &'a str,
    /// Provider response token produced by the widget
    pub solved_token: &'a str,
    pub reason: ChallengeReason,
    /// Client-measured solve duration, if reported
    pub elapsed_ms: Option<u64>,
}

/// Raw bypass token and expiry handed back for cookie-setting
pub struct SolvePass {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
    pub score: Option<f64>,
}

/// Challenge decision engine
pub struct ChallengeGate {
    configs: Arc<ConfigStore>,
    tokens: Arc<TokenStore>,
    events: Arc<EventLog>,
    verifier: Arc<CaptchaVerifier>,
}

impl ChallengeGate {
    pub fn new(
        configs: Arc<ConfigStore>,
        tokens: Arc<TokenStore>,
        events: Arc<EventLog>,
        verifier: Arc<CaptchaVerifier>,
    ) -> Self {
        Self {
            configs,
            tokens,
            events,
            verifier,
        }
    }

    /// Decide whether a forwarded request may pass. Called for every
    /// auth_request subrequest, so the happy path is one config fetch
    /// and one token lookup.
    pub async fn check(&self, redis: &mut ConnectionManager, req: ValidateRequest<'_>) -> GateDecision {
        if let Some(bypass_reason) = bypass::should_bypass(req.user_agent, req.geo_header) {
            tracing::debug!(
                bypass = ?bypass_reason,
                client_ip = %req.client_ip,
                "Request bypasses the challenge"
            );
            return GateDecision::Allow;
        }

        // Fail closed: an unreadable config counts as challenge required.
        let config = match self.configs.effective(redis, req.host_id).await {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, host = ?req.host_id, "Config lookup failed, denying");
                return GateDecision::Deny;
            }
        };

        if !config.enabled || !config.scope.covers(req.reason) {
            return GateDecision::Allow;
        }

        let mut outcome = ChallengeOutcome::Presented;
        if let Some(raw) = req.token {
            match self
                .tokens
                .validate(redis, raw, req.client_ip, req.host_id)
                .await
            {
                Ok(Some(record)) => {
                    tracing::debug!(
                        token_id = %record.id,
                        use_count = record.use_count,
                        "Bypass token accepted"
                    );
                    return GateDecision::Allow;
                }
                Ok(None) => {
                    // Expiry is distinguished for statistics only; the
                    // response below is the same deny as for any other
                    // invalid token.
                    if let Ok(Some(stale)) = self.tokens.peek(redis, raw).await {
                        if stale.client_ip == req.client_ip
                            && !stale.revoked
                            && stale.is_expired_at(Utc::now())
                        {
                            outcome = ChallengeOutcome::Expired;
                        }
                    }
                }
                Err(err) => {
                    // Fail closed on store errors here as well.
                    tracing::error!(error = %err, "Token lookup failed, denying");
                    return GateDecision::Deny;
                }
            }
        }

        self.record(
            self.events
                .event(req.host_id, req.client_ip, req.user_agent, outcome, req.reason),
            redis,
        )
        .await;

        GateDecision::Deny
    }

    /// Handle a solved-CAPTCHA callback: verify with the provider, and
    /// on acceptance issue a bypass token for cookie-setting.
    pub async fn solve(
        &self,
        redis: &mut ConnectionManager,
        req: SolveRequest<'_>,
    ) -> Result<SolvePass, GateError> {
        let config = self
            .configs
            .effective(redis, req.host_id)
            .await
            .map_err(|err| GateError::Store(err.to_string()))?;

        if !config.enabled {
            return Err(GateError::ChallengeDisabled);
        }
        if !config.has_secret_key() {
            return Err(GateError::MissingSecretKey);
        }

        let verdict = match self
            .verifier
            .verify(
                config.challenge_type,
                &config.secret_key,
                req.solved_token,
                req.client_ip,
            )
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    provider = config.challenge_type.as_str(),
                    "Provider verification errored"
                );
                self.record_solve_outcome(redis, &req, ChallengeOutcome::Failed, None)
                    .await;
                return Err(GateError::VerificationFailed);
            }
        };

        if !verdict.is_passing(config.min_score) {
            tracing::info!(
                provider = config.challenge_type.as_str(),
                score = ?verdict.score(),
                error_codes = ?verdict.error_codes(),
                client_ip = %req.client_ip,
                "Challenge solution rejected"
            );
            self.record_solve_outcome(redis, &req, ChallengeOutcome::Failed, verdict.score())
                .await;
            return Err(GateError::VerificationFailed);
        }

        let issued = self
            .tokens
            .issue(
                redis,
                req.host_id,
                req.client_ip,
                req.user_agent,
                req.reason,
                config.token_validity_secs,
            )
            .await
            .map_err(|err| GateError::Store(err.to_string()))?;

        let mut event = self.events.event(
            req.host_id,
            req.client_ip,
            req.user_agent,
            ChallengeOutcome::Passed,
            req.reason,
        );
        event.score = verdict.score();
        event.solve_time_ms = req.elapsed_ms;
        self.record(event, redis).await;

        tracing::info!(
            token_id = %issued.record.id,
            host = ?req.host_id,
            client_ip = %req.client_ip,
            "Challenge passed, bypass token issued"
        );

        Ok(SolvePass {
            token: issued.raw,
            expires_at: issued.record.expires_at,
            expires_in: config.token_validity_secs as i64,
            score: verdict.score(),
        })
    }

    async fn record_solve_outcome(
        &self,
        redis: &mut ConnectionManager,
        req: &SolveRequest<'_>,
        outcome: ChallengeOutcome,
        score: Option<f64>,
    ) {
        let mut event = self
            .events
            .event(req.host_id, req.client_ip, req.user_agent, outcome, req.reason);
        event.score = score;
        event.solve_time_ms = req.elapsed_ms;
        self.record(event, redis).await;
    }

    /// Statistics must never break the request path
    async fn record(&self, event: ChallengeEvent, redis: &mut ConnectionManager) {
        if let Err(err) = self.events.record(redis, &event).await {
            tracing::warn!(error = %err, "Failed to record challenge event");
        }
    }
}
