use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache_enabled = state.config.load().cache.enabled;
    let cache_entries = state.answers.cache_len().await.ok();
    Json(serde_json::json!({
        "status": "ok",
        "message": "AI题库服务运行正常",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_enabled": cache_enabled,
        "cache_entries": cache_entries,
        "proxies": state.registry.active_proxies().len(),
        "failover_enabled": state.health.is_enabled(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
