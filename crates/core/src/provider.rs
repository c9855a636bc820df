use crate::error::ErrorClass;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An upstream OpenAI-compatible completion provider, as held by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Proxy {
    pub name: String,
    /// Base URL without trailing `/`.
    pub base_url: String,
    pub api_keys: Vec<String>,
    pub models: Vec<String>,
    pub default_model: Option<String>,
    /// Lower is tried first.
    pub priority: i32,
    pub active: bool,
}

impl Proxy {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Model to send upstream: the requested one if this proxy lists it,
    /// otherwise the configured default, otherwise the first listed model.
    pub fn resolve_model<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        if let Some(model) = requested
            && self.supports_model(model)
        {
            return Some(model);
        }
        self.default_model
            .as_deref()
            .or_else(|| self.models.first().map(String::as_str))
            .or(requested)
    }

    /// Only the first key is used; keys are not rotated.
    pub fn api_key(&self) -> Option<&str> {
        self.api_keys.first().map(String::as_str)
    }

    fn api_root(&self) -> String {
        if self.base_url.ends_with("/v1") {
            self.base_url.clone()
        } else {
            format!("{}/v1", self.base_url)
        }
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_root())
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.api_root())
    }
}

// ─── Chat wire types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Non-streaming chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// The usable part of a successful upstream reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Why a single upstream attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{class}: {message}")]
pub struct AttemptError {
    pub class: ErrorClass,
    pub status: Option<u16>,
    pub message: String,
}

impl AttemptError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Performs the HTTP side of one attempt against one proxy.
#[async_trait]
pub trait ChatExecutor: Send + Sync {
    async fn complete(
        &self,
        proxy: &Proxy,
        request: &ChatRequest,
    ) -> Result<ChatResponse, AttemptError>;

    /// List model ids advertised by the proxy (`GET .../v1/models`).
    async fn list_models(&self, proxy: &Proxy) -> Result<Vec<String>, AttemptError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(base_url: &str) -> Proxy {
        Proxy {
            name: "p".to_string(),
            base_url: base_url.to_string(),
            api_keys: vec!["k1".to_string(), "k2".to_string()],
            models: vec!["m1".to_string(), "m2".to_string()],
            default_model: Some("m2".to_string()),
            priority: 1,
            active: true,
        }
    }

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            proxy("https://api.example.com").chat_completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            proxy("https://api.example.com/v1").chat_completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            proxy("https://api.example.com/v1").models_url(),
            "https://api.example.com/v1/models"
        );
    }

    #[test]
    fn test_resolve_model() {
        let mut p = proxy("https://x");
        assert_eq!(p.resolve_model(Some("m1")), Some("m1"));
        assert_eq!(p.resolve_model(Some("other")), Some("m2"));
        assert_eq!(p.resolve_model(None), Some("m2"));
        p.default_model = None;
        assert_eq!(p.resolve_model(None), Some("m1"));
    }

    #[test]
    fn test_first_key_is_used() {
        assert_eq!(proxy("https://x").api_key(), Some("k1"));
    }
}
