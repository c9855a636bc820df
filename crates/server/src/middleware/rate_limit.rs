use crate::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use axum::{Json, middleware::Next};
use quizgate_core::rate_limit::RateLimitInfo;
use serde_json::json;
use std::net::SocketAddr;

pub const RATE_LIMITED_MSG: &str = "请求过于频繁，请稍后再试";

/// Client address for rate limiting: the first `x-forwarded-for` hop, then
/// `x-real-ip`, then the socket peer.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-client sliding window on `/api/search`; rejections use the OCS shape.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);
    let info = state.rate_limiter.acquire(&client);

    if !info.allowed {
        tracing::warn!(client = %client, limit = info.limit, "Search rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "code": 0, "msg": RATE_LIMITED_MSG })),
        )
            .into_response();
        insert_headers(response.headers_mut(), &info);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(info.reset_secs));
        return response;
    }

    let mut response = next.run(request).await;
    if info.limit > 0 {
        insert_headers(response.headers_mut(), &info);
    }
    response
}

fn insert_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset_secs));
}
