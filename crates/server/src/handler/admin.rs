//! Diagnostics and failover controls.

use crate::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use quizgate_core::error::GatewayError;
use serde::Deserialize;
use serde_json::json;

/// GET /api/admin/health
pub async fn health_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    let status = state
        .health
        .all_status(snapshot.all().iter().map(|p| p.name.as_str()));
    Json(status)
}

/// GET /api/admin/health/{name}
pub async fn proxy_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    if state.registry.proxy(&name).is_none() {
        return Err(GatewayError::NotFound(format!("proxy '{name}'")));
    }
    Ok(Json(state.health.snapshot(&name)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetParams {
    pub name: Option<String>,
}

/// POST /api/admin/health/reset[?name=]
pub async fn reset_health(
    State(state): State<AppState>,
    Query(params): Query<ResetParams>,
) -> impl IntoResponse {
    match params.name {
        Some(name) => {
            let reset = state.health.reset(&name);
            Json(json!({ "reset": reset, "name": name }))
        }
        None => Json(json!({ "reset": state.health.reset_all() })),
    }
}

/// POST /api/admin/failover/enable
pub async fn enable_failover(State(state): State<AppState>) -> impl IntoResponse {
    state.health.enable();
    Json(json!({ "enabled": true }))
}

/// POST /api/admin/failover/disable
pub async fn disable_failover(State(state): State<AppState>) -> impl IntoResponse {
    state.health.disable();
    Json(json!({ "enabled": false }))
}

/// POST /api/admin/failover/toggle
pub async fn toggle_failover(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "enabled": state.health.toggle() }))
}

/// GET /api/admin/proxies: pool summary without key material.
pub async fn proxies(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "stats": state.registry.stats(),
        "models": state.registry.all_models(),
    }))
}

/// POST /api/admin/proxies/reload: re-read the config file and apply it
/// the same way a file change or SIGHUP does.
pub async fn reload_proxies(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    let count = state.reloader.reload()?;
    Ok(Json(json!({ "success": true, "proxies": count })))
}

/// GET /api/admin/config: settings the running components are using.
pub async fn runtime_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({
        "access_token_set": config.access_token.is_some(),
        "proxy_url_set": config.proxy_url.is_some(),
        "health": state.health.config(),
        "failover_enabled": state.health.is_enabled(),
        "dispatch": state.dispatcher.config().as_ref(),
        "cache": config.cache,
        "probe": config.probe,
        "rate_limit": state.rate_limiter.config(),
        "proxies": state.registry.active_proxies().len(),
    }))
}

/// GET /api/admin/probes
pub async fn probes(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "probes": state.probes.all() }))
}
