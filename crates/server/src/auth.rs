use crate::AppState;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, middleware::Next};
use quizgate_core::config::Config;
use quizgate_core::error::GatewayError;
use serde::Deserialize;
use serde_json::json;

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

pub const INVALID_TOKEN_MSG: &str = "无效的访问令牌";

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// True when no access token is configured, or the request carries the
/// configured one in the `X-Access-Token` header or the `token` query parameter.
pub fn is_authorized(config: &Config, request: &Request) -> bool {
    let Some(expected) = config.access_token.as_deref() else {
        return true;
    };

    let from_header = request
        .headers()
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let token = from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(q)| q.token)
    });

    token.as_deref() == Some(expected)
}

/// Guards `/api/search` and answers rejections in the OCS shape.
pub async fn search_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_authorized(&state.config.load(), &request) {
        return next.run(request).await;
    }
    tracing::warn!(path = %request.uri().path(), "Rejected search with invalid access token");
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "code": 0, "msg": INVALID_TOKEN_MSG })),
    )
        .into_response()
}

/// Guards `/api/cache/*`.
pub async fn cache_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_authorized(&state.config.load(), &request) {
        return next.run(request).await;
    }
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "success": false, "message": INVALID_TOKEN_MSG })),
    )
        .into_response()
}

/// Guards `/api/admin/*`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if is_authorized(&state.config.load(), &request) {
        Ok(next.run(request).await)
    } else {
        Err(GatewayError::Unauthorized)
    }
}
