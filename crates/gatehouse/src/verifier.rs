//! Third-party CAPTCHA verification.
//!
//! Posts the secret and the client-solved token to the provider's fixed
//! siteverify endpoint and interprets the provider-specific response
//! shape. Network, timeout, and decode failures fail the challenge,
//! never pass it.

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use bastion_common::ChallengeType;

// https://developers.google.com/recaptcha/docs/verify#api_request
const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

// https://docs.hcaptcha.com/#verify-the-user-response-server-side
const HCAPTCHA_VERIFY_URL: &str = "https://api.hcaptcha.com/siteverify";

// https://developers.cloudflare.com/turnstile/get-started/server-side-validation/
const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Provider-specific verification outcome. Only reCAPTCHA v3 reports a
/// score, so only its variant carries one.
#[derive(Debug, Clone)]
pub enum ProviderVerdict {
    RecaptchaV2 {
        success: bool,
        error_codes: Vec<String>,
    },
    RecaptchaV3 {
        success: bool,
        score: f64,
        action: Option<String>,
        error_codes: Vec<String>,
    },
    Hcaptcha {
        success: bool,
        error_codes: Vec<String>,
    },
    Turnstile {
        success: bool,
        error_codes: Vec<String>,
    },
}

impl ProviderVerdict {
    pub fn provider_success(&self) -> bool {
        match self {
            Self::RecaptchaV2 { success, .. }
            | Self::RecaptchaV3 { success, .. }
            | Self::Hcaptcha { success, .. }
            | Self::Turnstile { success, .. } => *success,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Self::RecaptchaV3 { score, .. } => Some(*score),
            _ => None,
        }
    }

    /// Provider error codes, for server-side diagnostics only
    pub fn error_codes(&self) -> &[String] {
        match self {
            Self::RecaptchaV2 { error_codes, .. }
            | Self::RecaptchaV3 { error_codes, .. }
            | Self::Hcaptcha { error_codes, .. }
            | Self::Turnstile { error_codes, .. } => error_codes,
        }
    }

    /// Overall acceptance: the provider's success flag, and for
    /// score-bearing verdicts a score at or above the configured
    /// minimum. A provider-reported success below threshold is a failed
    /// challenge.
    pub fn is_passing(&self, min_score: f64) -> bool {
        match self {
            Self::RecaptchaV3 { success, score, .. } => *success && *score >= min_score,
            _ => self.provider_success(),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {0}")]
    UnexpectedStatus(u16),
}

/// Raw siteverify JSON. Every provider shares the success flag; the rest
/// is provider-specific and optional. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Third-party CAPTCHA verifier
pub struct CaptchaVerifier {
    http: reqwest::Client,
}

impl CaptchaVerifier {
    /// Build a verifier whose outbound calls run under a bounded timeout
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(concat!("gatehouse/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build reqwest client")?;

        Ok(Self { http })
    }

    /// Verify a solved token against the configured provider
    pub async fn verify(
        &self,
        challenge_type: ChallengeType,
        secret_key: &str,
        solved_token: &str,
        remote_ip: &str,
    ) -> Result<ProviderVerdict, VerifierError> {
        let params = [
            ("secret", secret_key),
            ("response", solved_token),
            ("remoteip", remote_ip),
        ];

        let response = self
            .http
            .post(verify_endpoint(challenge_type))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifierError::UnexpectedStatus(status.as_u16()));
        }

        let body: SiteverifyResponse = response.json().await?;
        Ok(interpret(challenge_type, body))
    }
}

fn verify_endpoint(challenge_type: ChallengeType) -> &'static str {
    match challenge_type {
        ChallengeType::RecaptchaV2 | ChallengeType::RecaptchaV3 => RECAPTCHA_VERIFY_URL,
        ChallengeType::Hcaptcha => HCAPTCHA_VERIFY_URL,
        ChallengeType::Turnstile => TURNSTILE_VERIFY_URL,
    }
}

/// Narrow the loose wire shape into the per-provider verdict. A v3
/// response without a score counts as 0.0, which can never clear a
/// positive threshold.
fn interpret(challenge_type: ChallengeType, body: SiteverifyResponse) -> ProviderVerdict {
    match challenge_type {
        ChallengeType::RecaptchaV2 => ProviderVerdict::RecaptchaV2 {
            success: body.success,
            error_codes: body.error_codes,
        },
        ChallengeType::RecaptchaV3 => ProviderVerdict::RecaptchaV3 {
            success: body.success,
            score: body.score.unwrap_or(0.0),
            action: body.action,
            error_codes: body.error_codes,
        },
        ChallengeType::Hcaptcha => ProviderVerdict::Hcaptcha {
            success: body.success,
            error_codes: body.error_codes,
        },
        ChallengeType::Turnstile => ProviderVerdict::Turnstile {
            success: body.success,
            error_codes: body.error_codes,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> SiteverifyResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn v3_success_below_threshold_fails() {
        let body = parse(r#"{"success": true, "score": 0.3, "action": "challenge"}"#);
        let verdict = interpret(ChallengeType::RecaptchaV3, body);

        assert!(verdict.provider_success());
        assert!(!verdict.is_passing(0.5));
    }

    #[test]
    fn v3_success_at_threshold_passes() {
        let body = parse(r#"{"success": true, "score": 0.5}"#);
        let verdict = interpret(ChallengeType::RecaptchaV3, body);

        assert!(verdict.is_passing(0.5));
        assert_eq!(verdict.score(), Some(0.5));
    }

    #[test]
    fn v3_without_score_never_passes_a_positive_threshold() {
        let body = parse(r#"{"success": true}"#);
        let verdict = interpret(ChallengeType::RecaptchaV3, body);

        assert!(!verdict.is_passing(0.5));
    }

    #[test]
    fn non_scoring_providers_ignore_the_threshold() {
        for challenge_type in [
            ChallengeType::RecaptchaV2,
            ChallengeType::Hcaptcha,
            ChallengeType::Turnstile,
        ] {
            let verdict = interpret(challenge_type, parse(r#"{"success": true}"#));
            assert!(verdict.is_passing(0.99));
            assert_eq!(verdict.score(), None);
        }
    }

    #[test]
    fn provider_failure_is_never_passing() {
        let body = parse(r#"{"success": false, "error-codes": ["invalid-input-response"]}"#);
        let verdict = interpret(ChallengeType::Turnstile, body);

        assert!(!verdict.is_passing(0.0));
        assert_eq!(verdict.error_codes(), ["invalid-input-response"]);
    }

    #[test]
    fn error_codes_use_the_kebab_case_wire_key() {
        let body = parse(r#"{"success": false, "error-codes": ["timeout-or-duplicate"]}"#);
        assert_eq!(body.error_codes, vec!["timeout-or-duplicate"]);
    }

    #[test]
    fn endpoints_are_fixed_per_provider() {
        assert!(verify_endpoint(ChallengeType::RecaptchaV2).contains("google.com"));
        assert!(verify_endpoint(ChallengeType::RecaptchaV3).contains("google.com"));
        assert!(verify_endpoint(ChallengeType::Hcaptcha).contains("hcaptcha.com"));
        assert!(verify_endpoint(ChallengeType::Turnstile).contains("cloudflare.com"));
    }
}
