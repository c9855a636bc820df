use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Classification of a single failed upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// HTTP 401/403: bad or expired key.
    AuthError,
    /// HTTP 429.
    RateLimit,
    /// HTTP 5xx.
    ServerError,
    /// The attempt hit its request timeout.
    Timeout,
    /// Connection refused, DNS failure, reset, ...
    Network,
    /// HTTP 200 with malformed JSON or no usable content.
    EmptyResponse,
    /// Any other HTTP 4xx.
    ClientError,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthError => "authError",
            Self::RateLimit => "rateLimit",
            Self::ServerError => "serverError",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::EmptyResponse => "emptyResponse",
            Self::ClientError => "clientError",
        }
    }

    /// Classify an upstream HTTP status. `None` for 2xx/3xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(Self::AuthError),
            429 => Some(Self::RateLimit),
            s if s >= 500 => Some(Self::ServerError),
            s if s >= 400 => Some(Self::ClientError),
            _ => None,
        }
    }

    /// Whether the same proxy should be retried (with backoff) before failing over.
    pub fn retries_same_proxy(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServerError)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for gateway operations surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no proxies are configured")]
    NoProxies,

    /// Every candidate failed. `last_error` is for diagnostics and never
    /// appears in the message.
    #[error("could not obtain an answer after trying available providers")]
    AllProxiesExhausted {
        attempts: usize,
        last_error: Option<ErrorClass>,
    },

    #[error("invalid access token")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoProxies | Self::AllProxiesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Self::Config(_) => "config_error",
            Self::NoProxies => "no_proxies",
            Self::AllProxiesExhausted { .. } => "all_proxies_exhausted",
            Self::Unauthorized => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "message": self.to_string(),
                "code": self.error_code(),
            }
        });

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(ErrorClass::from_status(200), None);
        assert_eq!(ErrorClass::from_status(401), Some(ErrorClass::AuthError));
        assert_eq!(ErrorClass::from_status(403), Some(ErrorClass::AuthError));
        assert_eq!(ErrorClass::from_status(429), Some(ErrorClass::RateLimit));
        assert_eq!(ErrorClass::from_status(500), Some(ErrorClass::ServerError));
        assert_eq!(ErrorClass::from_status(503), Some(ErrorClass::ServerError));
        assert_eq!(ErrorClass::from_status(404), Some(ErrorClass::ClientError));
    }

    #[test]
    fn test_retry_policy() {
        assert!(ErrorClass::RateLimit.retries_same_proxy());
        assert!(ErrorClass::ServerError.retries_same_proxy());
        assert!(!ErrorClass::AuthError.retries_same_proxy());
        assert!(!ErrorClass::Timeout.retries_same_proxy());
        assert!(!ErrorClass::EmptyResponse.retries_same_proxy());
    }

    #[test]
    fn test_exhausted_message_hides_details() {
        let err = GatewayError::AllProxiesExhausted {
            attempts: 3,
            last_error: Some(ErrorClass::AuthError),
        };
        let msg = err.to_string();
        assert!(!msg.contains("auth"));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
