//! Challenge flow endpoints: validate (nginx auth_request target),
//! verify (solve callback), and the public challenge page.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bastion_common::constants::{CHALLENGE_COOKIE, headers as gate_headers};
use bastion_common::{ChallengeReason, GateError};

use crate::gate::{GateDecision, SolveRequest, ValidateRequest};
use crate::page::{self, PageContext};
use crate::state::AppState;

/// Validate a bypass token.
///
/// Called by nginx via auth_request for every protected request. Only
/// the status code matters to nginx: 200 = allow, 401 = deny (and the
/// edge redirects the browser to the challenge page).
pub async fn validate(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let mut redis = state.redis.clone();

    let client_ip = client_ip(&headers);
    let token = bypass_token(&headers);
    let request = ValidateRequest {
        host_id: header_i64(&headers, gate_headers::X_PROXY_HOST_ID),
        client_ip: &client_ip,
        user_agent: header_str(&headers, "user-agent").unwrap_or(""),
        geo_header: header_str(&headers, gate_headers::X_GEO_BLOCKED),
        token: token.as_deref(),
        reason: challenge_reason(&headers),
    };

    match state.gate.check(&mut redis, request).await {
        GateDecision::Allow => StatusCode::OK,
        GateDecision::Deny => StatusCode::UNAUTHORIZED,
    }
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    /// Provider response token produced by the solved widget
    token: String,
    #[serde(default)]
    proxy_host_id: Option<i64>,
    #[serde(default)]
    challenge_reason: Option<ChallengeReason>,
    #[serde(default)]
    elapsed_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Verify a solved CAPTCHA and issue a bypass token
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyRequest>,
) -> (StatusCode, Json<VerifyResponse>) {
    if payload.token.is_empty() {
        return error_response(GateError::InvalidInput("missing token".to_string()));
    }

    let mut redis = state.redis.clone();
    let client_ip = client_ip(&headers);
    let request = SolveRequest {
        host_id: payload.proxy_host_id,
        client_ip: &client_ip,
        user_agent: header_str(&headers, "user-agent").unwrap_or(""),
        solved_token: &payload.token,
        reason: payload.challenge_reason.unwrap_or_default(),
        elapsed_ms: payload.elapsed_ms,
    };

    match state.gate.solve(&mut redis, request).await {
        Ok(pass) => (
            StatusCode::OK,
            Json(VerifyResponse {
                success: true,
                token: Some(pass.token),
                expires_at: Some(pass.expires_at),
                expires_in: Some(pass.expires_in),
                score: pass.score,
                error: None,
            }),
        ),
        Err(err) => error_response(err),
    }
}

fn error_response(err: GateError) -> (StatusCode, Json<VerifyResponse>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(VerifyResponse {
            success: false,
            token: None,
            expires_at: None,
            expires_in: None,
            score: None,
            error: Some(err.to_string()),
        }),
    )
}

#[derive(Deserialize)]
pub struct PageQuery {
    host: Option<i64>,
    reason: Option<String>,
    #[serde(rename = "return")]
    return_url: Option<String>,
}

/// Render the public challenge page
pub async fn page(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Response {
    let mut redis = state.redis.clone();

    let reason = query
        .reason
        .as_deref()
        .and_then(|r| r.parse().ok())
        .unwrap_or(ChallengeReason::GeoRestriction);

    let config = match state.configs.effective(&mut redis, query.host).await {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, host = ?query.host, "Config lookup failed for challenge page");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let html = page::render(&PageContext {
        config: &config,
        host_id: query.host,
        reason,
        return_url: query.return_url.as_deref(),
        accept_language: header_str(&headers, "accept-language"),
        fallback_language: state.config.default_language,
    });

    ([(header::CACHE_CONTROL, "no-store")], Html(html)).into_response()
}

// === Header helpers ===

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    header_str(headers, name).and_then(|value| value.parse().ok())
}

/// Client IP as reported by the edge proxy
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    if let Some(ip) = header_str(headers, "x-real-ip") {
        return ip.to_string();
    }
    header_str(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Bypass token from the X-Challenge-Token header, else the ng_challenge
/// cookie
fn bypass_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = header_str(headers, gate_headers::X_CHALLENGE_TOKEN) {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    header_str(headers, "cookie")
        .and_then(|raw| cookie_value(raw, CHALLENGE_COOKIE))
        .map(str::to_string)
}

fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some(key), Some(value)) if key == name => Some(value),
            _ => None,
        }
    })
}

/// Reason for this validate call: an explicit edge override wins, then a
/// present geo header marks the geo path, everything else is the bot
/// filter.
fn challenge_reason(headers: &HeaderMap) -> ChallengeReason {
    if let Some(reason) = header_str(headers, gate_headers::X_CHALLENGE_REASON)
        .and_then(|raw| raw.parse().ok())
    {
        return reason;
    }
    match header_str(headers, gate_headers::X_GEO_BLOCKED) {
        Some(_) => ChallengeReason::GeoRestriction,
        None => ChallengeReason::BotFilter,
    }
}
