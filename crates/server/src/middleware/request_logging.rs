use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps each request with an id, echoes it in `x-request-id` and logs the
/// outcome. Query strings are left out since they may carry the access token.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    tracing::debug!(request_id = %request_id, method = %method, path = %path, "Request received");

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    if status >= 500 {
        tracing::warn!(request_id = %request_id, method = %method, path = %path, status, elapsed_ms, "Request failed");
    } else {
        tracing::info!(request_id = %request_id, method = %method, path = %path, status, elapsed_ms, "Request completed");
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
