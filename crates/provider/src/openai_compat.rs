use async_trait::async_trait;
use quizgate_core::config::DispatchConfig;
use quizgate_core::error::ErrorClass;
use quizgate_core::provider::{AttemptError, ChatExecutor, ChatRequest, ChatResponse, Proxy, Usage};
use serde::Deserialize;

/// Longest upstream error body kept in an `AttemptError` message.
const ERROR_BODY_LIMIT: usize = 200;

/// Talks to any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAICompatExecutor {
    client: reqwest::Client,
}

impl OpenAICompatExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with the dispatch timeouts and optional outbound proxy.
    pub fn from_config(
        outbound_proxy: Option<&str>,
        dispatch: &DispatchConfig,
    ) -> Result<Self, anyhow::Error> {
        let client = quizgate_core::proxy::build_http_client(outbound_proxy, dispatch)?;
        Ok(Self::new(client))
    }

    /// Send and return the body of a non-error reply.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Vec<u8>, AttemptError> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status().as_u16();
        if let Some(class) = ErrorClass::from_status(status) {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(AttemptError::new(class, format!("HTTP {status}: {snippet}"))
                .with_status(status));
        }
        let body = resp.bytes().await.map_err(transport_error)?;
        Ok(body.to_vec())
    }
}

/// Map a reqwest transport failure to an attempt class.
fn transport_error(e: reqwest::Error) -> AttemptError {
    let class = if e.is_timeout() {
        ErrorClass::Timeout
    } else {
        ErrorClass::Network
    };
    AttemptError::new(class, e.to_string())
}

// ─── Response bodies ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelItem>,
}

#[derive(Deserialize)]
struct ModelItem {
    id: String,
}

/// Extract `choices[0].message.content`. Malformed JSON, a missing path, or
/// blank content all count as an empty response.
pub fn parse_completion(body: &[u8]) -> Result<ChatResponse, AttemptError> {
    let parsed: CompletionBody = serde_json::from_slice(body).map_err(|e| {
        AttemptError::new(ErrorClass::EmptyResponse, format!("malformed JSON: {e}"))
    })?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AttemptError::new(ErrorClass::EmptyResponse, "no content in choices[0]"))?;
    Ok(ChatResponse {
        content,
        usage: parsed.usage,
    })
}

#[async_trait]
impl ChatExecutor for OpenAICompatExecutor {
    async fn complete(
        &self,
        proxy: &Proxy,
        request: &ChatRequest,
    ) -> Result<ChatResponse, AttemptError> {
        let key = proxy
            .api_key()
            .ok_or_else(|| AttemptError::new(ErrorClass::AuthError, "proxy has no API key"))?;
        let req = self
            .client
            .post(proxy.chat_completions_url())
            .bearer_auth(key)
            .json(request);
        let body = self.send(req).await?;
        parse_completion(&body)
    }

    async fn list_models(&self, proxy: &Proxy) -> Result<Vec<String>, AttemptError> {
        let key = proxy
            .api_key()
            .ok_or_else(|| AttemptError::new(ErrorClass::AuthError, "proxy has no API key"))?;
        let req = self.client.get(proxy.models_url()).bearer_auth(key);
        let body = self.send(req).await?;
        let list: ModelList = serde_json::from_slice(&body).map_err(|e| {
            AttemptError::new(ErrorClass::EmptyResponse, format!("malformed model list: {e}"))
        })?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
