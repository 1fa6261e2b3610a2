//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::models::ProxyStatusView;

/// Service banner
pub async fn root() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "YouTube Transcript Service"
        })),
    )
}

/// Health check endpoint
///
/// A pooled service with no proxy currently available reports `degraded`;
/// requests may still succeed once cooldowns expire.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.service;
    let (pool_size, active_proxies) = service
        .pool()
        .map(|pool| (pool.pool_size(), pool.active_proxy_count()))
        .unwrap_or((0, 0));

    let status = match service.pool() {
        Some(_) if active_proxies == 0 => "degraded",
        _ => "healthy",
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "pool_size": pool_size,
            "active_proxies": active_proxies,
            "proxy_mode": service.mode().as_str(),
        })),
    )
}

/// Uptime plus per-proxy usage
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let proxies: Vec<ProxyStatusView> = state
        .service
        .pool()
        .map(|pool| pool.status())
        .unwrap_or_default();

    Json(json!({
        "status": "ok",
        "source": state.service.source_name(),
        "proxy_mode": state.service.mode().as_str(),
        "started_at": state.started_at_utc.to_rfc3339(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "pool_size": proxies.len(),
        "proxies": proxies,
    }))
}
