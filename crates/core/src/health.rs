//! Per-proxy health bookkeeping and circuit breaker.
//!
//! # Status transitions
//! ```text
//! Healthy/Degraded → Unhealthy: windowed failures >= max_failures
//! Unhealthy → Recovering:       recovery_time elapsed since last failure
//! Recovering → Unhealthy:       any failure (consecutive_failures = 1)
//! any → Healthy:                any success
//! ```
//!
//! The breaker is evaluated separately: with at least
//! `min_requests_for_breaker` samples in the window and a failure rate at or
//! above `breaker_threshold`, the proxy is excluded whatever its status.
//!
//! All state sits behind one mutex. Every `*_at` method takes the current
//! instant so time can be driven from tests.

use crate::config::HealthConfig;
use crate::error::ErrorClass;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Recovering,
    /// No attempts recorded yet.
    Unknown,
}

#[derive(Debug)]
struct HealthRecord {
    successes: VecDeque<Instant>,
    failures: VecDeque<(Instant, ErrorClass)>,
    /// (recorded at, latency in ms), bounded by `response_samples`.
    response_times: VecDeque<(Instant, u64)>,
    consecutive_failures: u32,
    status: HealthStatus,
    last_error: Option<ErrorClass>,
    last_failure_at: Option<Instant>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            successes: VecDeque::new(),
            failures: VecDeque::new(),
            response_times: VecDeque::new(),
            consecutive_failures: 0,
            status: HealthStatus::Unknown,
            last_error: None,
            last_failure_at: None,
            last_success: None,
            last_failure: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        let expired = |t: Instant| now.saturating_duration_since(t) > window;
        while self.successes.front().is_some_and(|t| expired(*t)) {
            self.successes.pop_front();
        }
        while self.failures.front().is_some_and(|(t, _)| expired(*t)) {
            self.failures.pop_front();
        }
    }

    fn recovery_elapsed(&self, now: Instant, recovery: Duration) -> bool {
        self.last_failure_at
            .is_none_or(|t| now.saturating_duration_since(t) >= recovery)
    }

    /// Status as it would be reported at `now`, without mutating.
    fn effective_status(&self, now: Instant, config: &HealthConfig) -> HealthStatus {
        if self.status == HealthStatus::Unhealthy
            && self.recovery_elapsed(now, config.recovery_time())
        {
            HealthStatus::Recovering
        } else {
            self.status
        }
    }

    /// Counts of (successes, failures) inside the window at `now`.
    fn window_counts(&self, now: Instant, window: Duration) -> (usize, usize) {
        let live = |t: &Instant| now.saturating_duration_since(*t) <= window;
        (
            self.successes.iter().filter(|t| live(t)).count(),
            self.failures.iter().filter(|(t, _)| live(t)).count(),
        )
    }

    fn breaker_open(&self, now: Instant, config: &HealthConfig) -> bool {
        let (successes, failures) = self.window_counts(now, config.failure_window());
        let total = successes + failures;
        total >= config.min_requests_for_breaker
            && total > 0
            && failures as f64 / total as f64 >= config.breaker_threshold
    }
}

/// Read-only diagnostic view of one proxy.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub name: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub recent_failures: usize,
    pub recent_successes: usize,
    /// Percentage of windowed attempts that succeeded; 100 with no data.
    pub success_rate: f64,
    /// Mean latency of windowed successes, in milliseconds.
    pub avg_response_time_ms: Option<f64>,
    pub circuit_open: bool,
    pub last_error: Option<ErrorClass>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub failures_by_class: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllHealthStatus {
    pub enabled: bool,
    pub proxies: BTreeMap<String, HealthSnapshot>,
    pub config: HealthConfig,
}

struct Inner {
    records: HashMap<String, HealthRecord>,
    config: HealthConfig,
}

pub struct HealthTracker {
    inner: Mutex<Inner>,
    enabled: AtomicBool,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                config,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning leaves the records consistent; keep using them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Recording ──

    pub fn record_success(&self, name: &str, latency: Duration) {
        self.record_success_at(name, latency, Instant::now());
    }

    pub fn record_success_at(&self, name: &str, latency: Duration, now: Instant) {
        let mut guard = self.lock();
        let Inner { records, config } = &mut *guard;
        let record = records
            .entry(name.to_string())
            .or_insert_with(HealthRecord::new);

        record.prune(now, config.failure_window());
        record.successes.push_back(now);
        record
            .response_times
            .push_back((now, latency.as_millis() as u64));
        while record.response_times.len() > config.response_samples {
            record.response_times.pop_front();
        }

        if matches!(
            record.status,
            HealthStatus::Unhealthy | HealthStatus::Recovering
        ) {
            tracing::info!(proxy = name, "Proxy recovered");
        }
        record.consecutive_failures = 0;
        record.status = HealthStatus::Healthy;
        record.last_success = Some(Utc::now());
    }

    pub fn record_failure(&self, name: &str, class: ErrorClass) {
        self.record_failure_at(name, class, Instant::now());
    }

    pub fn record_failure_at(&self, name: &str, class: ErrorClass, now: Instant) {
        let mut guard = self.lock();
        let Inner { records, config } = &mut *guard;
        let record = records
            .entry(name.to_string())
            .or_insert_with(HealthRecord::new);

        record.prune(now, config.failure_window());
        record.failures.push_back((now, class));
        record.last_error = Some(class);
        record.last_failure_at = Some(now);
        record.last_failure = Some(Utc::now());

        if record.status == HealthStatus::Recovering {
            record.consecutive_failures = 1;
            record.status = HealthStatus::Unhealthy;
            tracing::warn!(proxy = name, error = %class, "Proxy failed while recovering");
            return;
        }

        record.consecutive_failures += 1;
        if record.failures.len() >= config.max_failures {
            if record.status != HealthStatus::Unhealthy {
                tracing::warn!(
                    proxy = name,
                    error = %class,
                    failures = record.failures.len(),
                    "Proxy marked unhealthy"
                );
            }
            record.status = HealthStatus::Unhealthy;
        } else if record.status != HealthStatus::Unhealthy {
            record.status = HealthStatus::Degraded;
        }
    }

    // ── Decisions ──

    pub fn is_healthy(&self, name: &str) -> bool {
        self.is_healthy_at(name, Instant::now())
    }

    pub fn is_healthy_at(&self, name: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let mut guard = self.lock();
        let Inner { records, config } = &mut *guard;
        let Some(record) = records.get_mut(name) else {
            return true;
        };

        record.prune(now, config.failure_window());
        if record.status == HealthStatus::Unhealthy {
            if !record.recovery_elapsed(now, config.recovery_time()) {
                return false;
            }
            record.status = HealthStatus::Recovering;
            tracing::info!(proxy = name, "Proxy entering recovery");
        }

        if record.breaker_open(now, config) {
            tracing::debug!(proxy = name, "Circuit breaker open");
            return false;
        }
        true
    }

    // ── Diagnostics ──

    pub fn snapshot(&self, name: &str) -> HealthSnapshot {
        self.snapshot_at(name, Instant::now())
    }

    pub fn snapshot_at(&self, name: &str, now: Instant) -> HealthSnapshot {
        let guard = self.lock();
        build_snapshot(name, guard.records.get(name), &guard.config, now)
    }

    /// Snapshots for `names` plus every proxy with recorded history.
    pub fn all_status<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> AllHealthStatus {
        let now = Instant::now();
        let guard = self.lock();
        let mut proxies = BTreeMap::new();
        for name in names {
            let snapshot = build_snapshot(name, guard.records.get(name), &guard.config, now);
            proxies.insert(name.to_string(), snapshot);
        }
        for (name, record) in &guard.records {
            if !proxies.contains_key(name) {
                let snapshot = build_snapshot(name, Some(record), &guard.config, now);
                proxies.insert(name.clone(), snapshot);
            }
        }
        AllHealthStatus {
            enabled: self.is_enabled(),
            proxies,
            config: guard.config.clone(),
        }
    }

    // ── Control ──

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        tracing::info!("Failover health tracking enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        tracing::info!("Failover health tracking disabled");
    }

    /// Flip the enabled flag and return the new value.
    pub fn toggle(&self) -> bool {
        let enabled = !self.enabled.fetch_xor(true, Ordering::Relaxed);
        tracing::info!(enabled, "Failover health tracking toggled");
        enabled
    }

    /// Forget everything recorded for `name`. Returns whether a record existed.
    pub fn reset(&self, name: &str) -> bool {
        let removed = self.lock().records.remove(name).is_some();
        if removed {
            tracing::info!(proxy = name, "Health record reset");
        }
        removed
    }

    pub fn reset_all(&self) -> usize {
        let mut guard = self.lock();
        let count = guard.records.len();
        guard.records.clear();
        tracing::info!(count, "All health records reset");
        count
    }

    /// Swap thresholds in place; recorded history is kept.
    pub fn update_config(&self, config: HealthConfig) {
        let mut guard = self.lock();
        if guard.config != config {
            self.enabled.store(config.enabled, Ordering::Relaxed);
            guard.config = config;
            tracing::info!("Health thresholds updated");
        }
    }

    pub fn config(&self) -> HealthConfig {
        self.lock().config.clone()
    }
}

fn build_snapshot(
    name: &str,
    record: Option<&HealthRecord>,
    config: &HealthConfig,
    now: Instant,
) -> HealthSnapshot {
    let Some(record) = record else {
        return HealthSnapshot {
            name: name.to_string(),
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            recent_failures: 0,
            recent_successes: 0,
            success_rate: 100.0,
            avg_response_time_ms: None,
            circuit_open: false,
            last_error: None,
            last_success: None,
            last_failure: None,
            failures_by_class: BTreeMap::new(),
        };
    };

    let window = config.failure_window();
    let (successes, failures) = record.window_counts(now, window);
    let total = successes + failures;
    let success_rate = if total == 0 {
        100.0
    } else {
        successes as f64 * 100.0 / total as f64
    };

    let recent_latencies: Vec<u64> = record
        .response_times
        .iter()
        .filter(|(t, _)| now.saturating_duration_since(*t) <= window)
        .map(|(_, ms)| *ms)
        .collect();
    let avg_response_time_ms = (!recent_latencies.is_empty())
        .then(|| recent_latencies.iter().sum::<u64>() as f64 / recent_latencies.len() as f64);

    let mut failures_by_class = BTreeMap::new();
    for (t, class) in &record.failures {
        if now.saturating_duration_since(*t) <= window {
            *failures_by_class.entry(class.to_string()).or_insert(0) += 1;
        }
    }

    HealthSnapshot {
        name: name.to_string(),
        status: record.effective_status(now, config),
        consecutive_failures: record.consecutive_failures,
        recent_failures: failures,
        recent_successes: successes,
        success_rate,
        avg_response_time_ms,
        circuit_open: record.breaker_open(now, config),
        last_error: record.last_error,
        last_success: record.last_success,
        last_failure: record.last_failure,
        failures_by_class,
    }
}
