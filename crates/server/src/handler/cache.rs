use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

/// POST /api/cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    if !state.config.load().cache.enabled {
        return Json(json!({ "success": false, "message": "缓存功能未启用" }));
    }

    match state.answers.clear_cache().await {
        Ok(cleared) => Json(json!({
            "success": true,
            "message": format!("缓存已清除，共{cleared}条记录"),
            "cleared": cleared,
        })),
        Err(e) => {
            tracing::warn!("Cache clear failed: {e}");
            Json(json!({ "success": false, "message": e.to_string() }))
        }
    }
}

/// POST /api/cache/purge: drop expired entries only.
pub async fn purge_expired(State(state): State<AppState>) -> impl IntoResponse {
    match state.answers.purge_expired().await {
        Ok(purged) => Json(json!({ "success": true, "purged": purged })),
        Err(e) => Json(json!({ "success": false, "message": e.to_string() })),
    }
}
