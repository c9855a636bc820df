use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    /// Shared secret for `/api/search` and cache administration. Unset means open.
    pub access_token: Option<String>,

    /// Global outbound proxy for upstream calls.
    pub proxy_url: Option<String>,

    // Logging
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    pub health: HealthConfig,
    pub dispatch: DispatchConfig,
    pub cache: CacheConfig,
    pub probe: ProbeConfig,
    pub rate_limit: RateLimitConfig,

    /// Upstream completion providers.
    #[serde(alias = "third_party_apis")]
    pub third_party_apis: Vec<ProxyEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            access_token: None,
            proxy_url: None,
            logging_to_file: false,
            log_dir: None,
            health: HealthConfig::default(),
            dispatch: DispatchConfig::default(),
            cache: CacheConfig::default(),
            probe: ProbeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            third_party_apis: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a YAML (or JSON) file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, anyhow::Error> {
        let mut config: Config = serde_yaml_ng::from_str(contents)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(ref proxy) = self.proxy_url {
            crate::proxy::validate_proxy_url(proxy)?;
        }
        self.health.validate()?;
        anyhow::ensure!(
            self.dispatch.timeout_secs > 0,
            "dispatch.timeout-secs must be positive"
        );
        anyhow::ensure!(
            self.probe.interval_secs > 0,
            "probe.interval-secs must be positive"
        );
        anyhow::ensure!(
            self.rate_limit.period_secs > 0,
            "rate-limit.period-secs must be positive"
        );
        Ok(())
    }

    fn sanitize(&mut self) {
        sanitize_entries(&mut self.third_party_apis);
        if self.access_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.access_token = None;
        }
    }
}

/// Trim fields, strip trailing slashes from base URLs, and drop blank or
/// duplicate keys and models. Structural problems (missing name, no keys)
/// are left for the registry to reject.
fn sanitize_entries(entries: &mut [ProxyEntry]) {
    for entry in entries.iter_mut() {
        entry.name = entry
            .name
            .take()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        entry.api_base = entry
            .api_base
            .take()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        entry.model = entry
            .model
            .take()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        dedup_trimmed(&mut entry.api_keys);
        dedup_trimmed(&mut entry.models);
    }
}

fn dedup_trimmed(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    let trimmed: Vec<String> = values
        .drain(..)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect();
    *values = trimmed;
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HealthConfig {
    /// When false every proxy is reported healthy.
    pub enabled: bool,
    pub failure_window_secs: u64,
    pub max_failures: usize,
    pub recovery_time_secs: u64,
    pub breaker_threshold: f64,
    pub min_requests_for_breaker: usize,
    /// Ring buffer size for response-time samples.
    pub response_samples: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_window_secs: 300,
            max_failures: 3,
            recovery_time_secs: 600,
            breaker_threshold: 0.5,
            min_requests_for_breaker: 10,
            response_samples: 100,
        }
    }
}

impl HealthConfig {
    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            self.failure_window_secs > 0,
            "health.failure-window-secs must be positive"
        );
        anyhow::ensure!(self.max_failures > 0, "health.max-failures must be positive");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.breaker_threshold),
            "health.breaker-threshold must be within 0..=1"
        );
        anyhow::ensure!(
            self.response_samples > 0,
            "health.response-samples must be positive"
        );
        Ok(())
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn recovery_time(&self) -> Duration {
        Duration::from_secs(self.recovery_time_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DispatchConfig {
    /// Per-attempt request timeout.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Extra attempts on the same proxy for 429 / 5xx.
    pub max_same_proxy_retries: u32,
    /// First backoff delay; doubles on each same-proxy retry.
    pub retry_backoff_ms: u64,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_same_proxy_retries: 2,
            retry_backoff_ms: 1000,
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

impl DispatchConfig {
    /// Delay before same-proxy retry number `retry` (0-based): base, 2×base, 4×base...
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << retry.min(16)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 86400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 10,
        }
    }
}

/// Inbound limit on `/api/search`, per client address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client within one period. 0 disables the limit.
    pub requests: u32,
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 60,
            period_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

// ─── Proxy entry ───────────────────────────────────────────────────────────

/// One upstream provider as written in the config file. Field names follow
/// the provider record format (`api_base`, `api_keys`, `is_active`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Default model for this provider.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_active() -> bool {
    true
}

fn default_priority() -> i32 {
    1
}

// ─── Config Watcher ────────────────────────────────────────────────────────

pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `path`; on change (debounced 150ms, SHA-256 dedup) parse the new
    /// config and hand it to `on_reload`. The new config is published only if
    /// `on_reload` accepts it, so a bad proxy list leaves the old one in place.
    pub fn start(
        path: String,
        config: Arc<ArcSwap<Config>>,
        on_reload: impl Fn(&Config) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    ) -> Result<Self, anyhow::Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res
                && (event.kind.is_modify() || event.kind.is_create())
            {
                let _ = tx.try_send(());
            }
        })?;
        watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            let mut last_hash: Option<[u8; 32]> = None;
            while rx.recv().await.is_some() {
                // Coalesce bursts of editor writes.
                tokio::time::sleep(Duration::from_millis(150)).await;
                while rx.try_recv().is_ok() {}

                let contents = match tokio::fs::read(&path).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!("Config file read failed: {e}");
                        continue;
                    }
                };
                let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
                if last_hash == Some(hash) {
                    continue;
                }
                last_hash = Some(hash);

                let parsed = std::str::from_utf8(&contents)
                    .map_err(anyhow::Error::from)
                    .and_then(Config::parse);
                match parsed.and_then(|cfg| on_reload(&cfg).map(|()| cfg)) {
                    Ok(new_cfg) => {
                        tracing::info!(
                            proxies = new_cfg.third_party_apis.len(),
                            "Configuration reloaded"
                        );
                        config.store(Arc::new(new_cfg));
                    }
                    Err(e) => tracing::error!("Config reload rejected, keeping previous: {e}"),
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}
