//! Administrative token lifecycle endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const DEFAULT_REVOKE_REASON: &str = "administrative revocation";

#[derive(Deserialize)]
pub struct RevokeQuery {
    reason: Option<String>,
}

/// Revoke one token by id. Revoking an already-revoked token is a
/// no-op reported as 404.
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    Query(query): Query<RevokeQuery>,
) -> StatusCode {
    let mut redis = state.redis.clone();
    let reason = query.reason.as_deref().unwrap_or(DEFAULT_REVOKE_REASON);

    match state.tokens.revoke(&mut redis, &token_id, reason).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(err) => {
            tracing::error!(error = %err, token_id = %token_id, "Token revocation failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Deserialize)]
pub struct RevokeByIpRequest {
    ip: String,
    reason: Option<String>,
}

#[derive(Serialize)]
pub struct RevokeByIpResponse {
    revoked: u64,
}

/// Revoke every live token issued to an IP
pub async fn revoke_by_ip(
    State(state): State<AppState>,
    Json(payload): Json<RevokeByIpRequest>,
) -> Result<Json<RevokeByIpResponse>, StatusCode> {
    if payload.ip.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut redis = state.redis.clone();
    let reason = payload.reason.as_deref().unwrap_or(DEFAULT_REVOKE_REASON);

    state
        .tokens
        .revoke_all_for_ip(&mut redis, &payload.ip, reason)
        .await
        .map(|revoked| Json(RevokeByIpResponse { revoked }))
        .map_err(|err| {
            tracing::error!(error = %err, ip = %payload.ip, "Bulk revocation failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}

#[derive(Deserialize)]
pub struct ActiveQuery {
    proxy_host_id: Option<i64>,
}

#[derive(Serialize)]
pub struct ActiveResponse {
    active: u64,
}

/// Count non-revoked, unexpired tokens for a scope
pub async fn active_count(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Result<Json<ActiveResponse>, StatusCode> {
    let mut redis = state.redis.clone();

    state
        .tokens
        .count_active(&mut redis, query.proxy_host_id)
        .await
        .map(|active| Json(ActiveResponse { active }))
        .map_err(|err| {
            tracing::error!(error = %err, "Active token count failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}
