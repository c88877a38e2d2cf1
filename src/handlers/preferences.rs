// src/handlers/preferences.rs
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::preferences::{Preferences, PreferencesPatch};
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;

pub fn preferences_routes() -> Router {
    Router::new()
        .route(
            "/api/preferences",
            get(get_preferences).patch(update_preferences),
        )
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn get_preferences(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Preferences>, (StatusCode, Json<ErrorResponse>)> {
    let prefs = state
        .store
        .load_preferences(&claims.sub)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load preferences for user {}: {}", claims.sub, e);
            store_error()
        })?
        .unwrap_or_default();

    Ok(Json(prefs))
}

/// Merge-write: only fields present in the body change. Concurrent
/// writers are last-write-wins.
async fn update_preferences(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<PreferencesPatch>,
) -> Result<Json<Preferences>, (StatusCode, Json<ErrorResponse>)> {
    let merged = state
        .store
        .merge_preferences(&claims.sub, &patch)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update preferences for user {}: {}", claims.sub, e);
            store_error()
        })?;

    Ok(Json(merged))
}

fn store_error() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            message: "Internal server error".to_string(),
        }),
    )
}
