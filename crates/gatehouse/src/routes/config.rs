//! Challenge configuration endpoints.
//!
//! The secret key never leaves the server; responses carry only a
//! boolean "is one stored" flag.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use bastion_common::{ChallengeConfigUpdate, ChallengeConfigView};

use crate::state::AppState;

/// Effective global config (secret redacted)
pub async fn get_global(
    State(state): State<AppState>,
) -> Result<Json<ChallengeConfigView>, StatusCode> {
    read_config(&state, None).await
}

/// Effective config for one host (secret redacted)
pub async fn get_host(
    State(state): State<AppState>,
    Path(host_id): Path<i64>,
) -> Result<Json<ChallengeConfigView>, StatusCode> {
    read_config(&state, Some(host_id)).await
}

/// Partial update of the global config
pub async fn put_global(
    State(state): State<AppState>,
    Json(update): Json<ChallengeConfigUpdate>,
) -> Result<Json<ChallengeConfigView>, StatusCode> {
    write_config(&state, None, update).await
}

/// Partial update of one host's override
pub async fn put_host(
    State(state): State<AppState>,
    Path(host_id): Path<i64>,
    Json(update): Json<ChallengeConfigUpdate>,
) -> Result<Json<ChallengeConfigView>, StatusCode> {
    write_config(&state, Some(host_id), update).await
}

/// Remove the global record; hosts fall back to built-in defaults
pub async fn delete_global(State(state): State<AppState>) -> StatusCode {
    remove_config(&state, None).await
}

/// Remove a host override; the host falls back to the global tier
pub async fn delete_host(State(state): State<AppState>, Path(host_id): Path<i64>) -> StatusCode {
    remove_config(&state, Some(host_id)).await
}

async fn read_config(
    state: &AppState,
    scope: Option<i64>,
) -> Result<Json<ChallengeConfigView>, StatusCode> {
    let mut redis = state.redis.clone();
    state
        .configs
        .effective(&mut redis, scope)
        .await
        .map(|config| Json(ChallengeConfigView::from(config)))
        .map_err(|err| {
            tracing::error!(error = %err, host = ?scope, "Config read failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}

async fn write_config(
    state: &AppState,
    scope: Option<i64>,
    update: ChallengeConfigUpdate,
) -> Result<Json<ChallengeConfigView>, StatusCode> {
    if let Err(problem) = validate_update(&update) {
        tracing::debug!(host = ?scope, problem = %problem, "Rejected config update");
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut redis = state.redis.clone();
    state
        .configs
        .upsert(&mut redis, scope, &update)
        .await
        .map(|config| Json(ChallengeConfigView::from(config)))
        .map_err(|err| {
            tracing::error!(error = %err, host = ?scope, "Config update failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}

async fn remove_config(state: &AppState, scope: Option<i64>) -> StatusCode {
    let mut redis = state.redis.clone();
    match state.configs.delete(&mut redis, scope).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(err) => {
            tracing::error!(error = %err, host = ?scope, "Config delete failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn validate_update(update: &ChallengeConfigUpdate) -> Result<(), String> {
    if let Some(score) = update.min_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(format!("min_score {score} outside [0, 1]"));
        }
    }
    if let Some(validity) = update.token_validity_secs {
        if validity == 0 {
            return Err("token_validity_secs must be positive".to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_validation_bounds_score_and_validity() {
        let ok = ChallengeConfigUpdate {
            min_score: Some(0.5),
            token_validity_secs: Some(60),
            ..Default::default()
        };
        assert!(validate_update(&ok).is_ok());

        let bad_score = ChallengeConfigUpdate {
            min_score: Some(1.5),
            ..Default::default()
        };
        assert!(validate_update(&bad_score).is_err());

        let bad_validity = ChallengeConfigUpdate {
            token_validity_secs: Some(0),
            ..Default::default()
        };
        assert!(validate_update(&bad_validity).is_err());
    }
}
