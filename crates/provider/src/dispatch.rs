use crate::routing::select_candidates;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use quizgate_core::config::DispatchConfig;
use quizgate_core::error::{ErrorClass, GatewayError};
use quizgate_core::health::HealthTracker;
use quizgate_core::provider::{
    AttemptError, ChatExecutor, ChatMessage, ChatRequest, ChatResponse, Proxy, Usage,
};
use quizgate_core::registry::ProxyRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One completion to obtain from the pool.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub messages: Vec<ChatMessage>,
    /// Preferred model. Proxies that don't list it use their own default.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl DispatchRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }
}

/// Record of a single upstream call. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchAttempt {
    pub proxy_name: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
    /// `None` on success.
    pub error: Option<ErrorClass>,
    pub status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub content: String,
    pub proxy_name: String,
    pub model: String,
    pub usage: Option<Usage>,
    pub attempts: Vec<DispatchAttempt>,
}

/// Tries candidates strictly in priority order until one answers.
///
/// 429 and 5xx retry the same proxy with exponential backoff before moving
/// on; every other failure moves on immediately. Each attempt is reported to
/// the health tracker.
pub struct Dispatcher {
    registry: Arc<ProxyRegistry>,
    health: Arc<HealthTracker>,
    executor: Arc<dyn ChatExecutor>,
    config: ArcSwap<DispatchConfig>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        health: Arc<HealthTracker>,
        executor: Arc<dyn ChatExecutor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            health,
            executor,
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn update_config(&self, config: DispatchConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<DispatchConfig> {
        self.config.load_full()
    }

    pub async fn invoke(&self, request: &DispatchRequest) -> Result<DispatchOutcome, GatewayError> {
        let config = self.config.load_full();
        // One snapshot for the whole invocation; a concurrent reload doesn't affect it.
        let snapshot = self.registry.snapshot();
        if snapshot.active().is_empty() {
            return Err(GatewayError::NoProxies);
        }

        let candidates = select_candidates(&snapshot, &self.health, request.model.as_deref());
        let mut attempts = Vec::new();
        let mut last_error: Option<ErrorClass> = None;

        for proxy in &candidates {
            let Some(model) = proxy.resolve_model(request.model.as_deref()) else {
                tracing::warn!(proxy = %proxy.name, "Proxy has no usable model, skipping");
                continue;
            };
            let chat = ChatRequest {
                model: model.to_string(),
                messages: request.messages.clone(),
                temperature: request.temperature.unwrap_or(config.temperature),
                max_tokens: request.max_tokens.unwrap_or(config.max_tokens),
                stream: false,
            };

            let mut retry = 0u32;
            loop {
                let started_at = Utc::now();
                let start = Instant::now();
                let result = self.attempt(proxy, &chat, &config).await;
                let latency = start.elapsed();

                match result {
                    Ok(response) => {
                        self.health.record_success(&proxy.name, latency);
                        attempts.push(attempt_record(proxy, &chat.model, started_at, latency, None));
                        tracing::info!(
                            proxy = %proxy.name,
                            model = %chat.model,
                            latency_ms = latency.as_millis() as u64,
                            attempts = attempts.len(),
                            "Completion succeeded"
                        );
                        return Ok(DispatchOutcome {
                            content: response.content,
                            proxy_name: proxy.name.clone(),
                            model: chat.model,
                            usage: response.usage,
                            attempts,
                        });
                    }
                    Err(err) => {
                        self.health.record_failure(&proxy.name, err.class);
                        attempts.push(attempt_record(
                            proxy,
                            &chat.model,
                            started_at,
                            latency,
                            Some(&err),
                        ));
                        last_error = Some(err.class);

                        if err.class.retries_same_proxy() && retry < config.max_same_proxy_retries {
                            let delay = config.backoff(retry);
                            tracing::warn!(
                                proxy = %proxy.name,
                                error = %err,
                                retry = retry + 1,
                                "Retrying same proxy in {delay:?}"
                            );
                            tokio::time::sleep(delay).await;
                            retry += 1;
                            continue;
                        }

                        tracing::warn!(proxy = %proxy.name, error = %err, "Attempt failed, failing over");
                        break;
                    }
                }
            }
        }

        tracing::error!(
            attempts = attempts.len(),
            last_error = ?last_error,
            "All proxies exhausted"
        );
        Err(GatewayError::AllProxiesExhausted {
            attempts: attempts.len(),
            last_error,
        })
    }

    /// One upstream call, bounded by the dispatch timeout whatever the executor does.
    async fn attempt(
        &self,
        proxy: &Proxy,
        chat: &ChatRequest,
        config: &DispatchConfig,
    ) -> Result<ChatResponse, AttemptError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        match tokio::time::timeout(timeout, self.executor.complete(proxy, chat)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::new(
                ErrorClass::Timeout,
                format!("no response within {timeout:?}"),
            )),
        }
    }
}

fn attempt_record(
    proxy: &Proxy,
    model: &str,
    started_at: DateTime<Utc>,
    latency: Duration,
    error: Option<&AttemptError>,
) -> DispatchAttempt {
    DispatchAttempt {
        proxy_name: proxy.name.clone(),
        model: model.to_string(),
        started_at,
        latency_ms: latency.as_millis() as u64,
        error: error.map(|e| e.class),
        status: error.and_then(|e| e.status),
    }
}
