//! Periodic `/v1/models` probing. Results are diagnostics only and never feed
//! the health tracker's breaker counters.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quizgate_core::provider::ChatExecutor;
use quizgate_core::registry::ProxyRegistry;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub model_count: Option<usize>,
    pub error: Option<String>,
}

/// Latest probe result per proxy name.
#[derive(Debug, Default)]
pub struct ProbeBoard {
    results: DashMap<String, ProbeResult>,
}

impl ProbeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, result: ProbeResult) {
        self.results.insert(name.to_string(), result);
    }

    pub fn get(&self, name: &str) -> Option<ProbeResult> {
        self.results.get(name).map(|r| r.clone())
    }

    pub fn all(&self) -> BTreeMap<String, ProbeResult> {
        self.results
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Drop results for proxies that are no longer configured.
    fn retain_names(&self, names: &HashSet<String>) {
        self.results.retain(|name, _| names.contains(name));
    }
}

/// Probe every active proxy once, sequentially. Returns how many answered.
pub async fn probe_all(
    registry: &ProxyRegistry,
    executor: &dyn ChatExecutor,
    board: &ProbeBoard,
    timeout: Duration,
) -> usize {
    let proxies = registry.active_proxies();
    let names: HashSet<String> = proxies.iter().map(|p| p.name.clone()).collect();
    board.retain_names(&names);

    let mut ok = 0;
    for proxy in proxies {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, executor.list_models(&proxy)).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(models)) => {
                ok += 1;
                ProbeResult {
                    ok: true,
                    checked_at: Utc::now(),
                    latency_ms,
                    model_count: Some(models.len()),
                    error: None,
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(proxy = %proxy.name, error = %e, "Probe failed");
                ProbeResult {
                    ok: false,
                    checked_at: Utc::now(),
                    latency_ms,
                    model_count: None,
                    error: Some(e.class.to_string()),
                }
            }
            Err(_) => ProbeResult {
                ok: false,
                checked_at: Utc::now(),
                latency_ms,
                model_count: None,
                error: Some("timeout".to_string()),
            },
        };
        board.record(&proxy.name, result);
    }
    ok
}

/// Handle to the background probe loop. Dropping it without `stop()` leaves
/// the task running until the runtime shuts down.
pub struct HealthProbe {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthProbe {
    pub fn spawn(
        registry: Arc<ProxyRegistry>,
        executor: Arc<dyn ChatExecutor>,
        board: Arc<ProbeBoard>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ok = probe_all(&registry, executor.as_ref(), &board, timeout).await;
                        tracing::debug!(ok, "Health probe round finished");
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Health probe stopped");
        });
        tracing::info!(interval_secs = interval.as_secs(), "Health probe started");
        Self { stop_tx, handle }
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quizgate_core::config::ProxyEntry;
    use quizgate_core::error::ErrorClass;
    use quizgate_core::provider::{AttemptError, ChatRequest, ChatResponse, Proxy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ModelsExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatExecutor for ModelsExecutor {
        async fn complete(&self, _: &Proxy, _: &ChatRequest) -> Result<ChatResponse, AttemptError> {
            Err(AttemptError::new(ErrorClass::ClientError, "not used"))
        }

        async fn list_models(&self, proxy: &Proxy) -> Result<Vec<String>, AttemptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if proxy.name == "down" {
                Err(AttemptError::new(ErrorClass::Network, "refused"))
            } else {
                Ok(proxy.models.clone())
            }
        }
    }

    fn entry(name: &str) -> ProxyEntry {
        ProxyEntry {
            name: Some(name.to_string()),
            api_base: Some(format!("https://{name}.test")),
            api_keys: vec!["k".to_string()],
            model: None,
            models: vec!["m1".to_string(), "m2".to_string()],
            is_active: true,
            priority: 1,
        }
    }

    #[tokio::test]
    async fn test_probe_all_records_results() {
        let registry = ProxyRegistry::empty();
        registry.load(&[entry("up"), entry("down")]).unwrap();
        let executor = ModelsExecutor {
            calls: AtomicUsize::new(0),
        };
        let board = ProbeBoard::new();

        let ok = probe_all(&registry, &executor, &board, Duration::from_secs(5)).await;
        assert_eq!(ok, 1);
        let up = board.get("up").unwrap();
        assert!(up.ok);
        assert_eq!(up.model_count, Some(2));
        let down = board.get("down").unwrap();
        assert!(!down.ok);
        assert_eq!(down.error.as_deref(), Some("network"));

        registry.load(&[entry("up")]).unwrap();
        probe_all(&registry, &executor, &board, Duration::from_secs(5)).await;
        assert!(board.get("down").is_none());
        assert_eq!(board.all().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_loop_runs_and_stops() {
        let registry = Arc::new(ProxyRegistry::empty());
        registry.load(&[entry("up")]).unwrap();
        let executor = Arc::new(ModelsExecutor {
            calls: AtomicUsize::new(0),
        });
        let board = Arc::new(ProbeBoard::new());

        let probe = HealthProbe::spawn(
            registry,
            executor.clone(),
            board.clone(),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        tokio::time::sleep(Duration::from_secs(150)).await;
        probe.stop().await;

        // ticks at 0s, 60s, 120s
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert!(board.get("up").is_some());
    }
}
