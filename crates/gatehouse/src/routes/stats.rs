//! Aggregate challenge statistics.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use bastion_common::ChallengeStats;
use bastion_common::constants::DEFAULT_STATS_WINDOW_HOURS;

use crate::state::AppState;

/// Longest stats window we will aggregate (the log retention horizon)
const MAX_WINDOW_HOURS: i64 = 7 * 24;

#[derive(Deserialize)]
pub struct StatsQuery {
    proxy_host_id: Option<i64>,
    hours: Option<i64>,
}

/// Challenge statistics over a trailing window (default 24h)
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ChallengeStats>, StatusCode> {
    let hours = query
        .hours
        .unwrap_or(DEFAULT_STATS_WINDOW_HOURS)
        .clamp(1, MAX_WINDOW_HOURS);

    let mut redis = state.redis.clone();

    let events = state
        .events
        .window(&mut redis, query.proxy_host_id, hours)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, host = ?query.proxy_host_id, "Stats window read failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    let mut stats = ChallengeStats::from_events(&events, hours);
    stats.active_tokens = state
        .tokens
        .count_active(&mut redis, query.proxy_host_id)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "Active token count failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok(Json(stats))
}
