use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Per-client windows kept before idle ones are swept on insert.
const SWEEP_THRESHOLD: usize = 1024;

/// Sliding window rate limiter keyed by client address.
pub struct RateLimiter {
    clients: RwLock<HashMap<String, Mutex<SlidingWindow>>>,
    config: RwLock<RateLimitConfig>,
}

struct SlidingWindow {
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    /// Drop timestamps older than `period` and return the current count.
    fn count_and_prune(&mut self, now: Instant, period: Duration) -> u32 {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= period {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.len() as u32
    }

    fn reset_secs(&self, now: Instant, period: Duration) -> u64 {
        match self.timestamps.front() {
            Some(&oldest) => period
                .saturating_sub(now.saturating_duration_since(oldest))
                .as_secs()
                .max(1),
            None => period.as_secs(),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the oldest counted request leaves the window.
    pub reset_secs: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config: RwLock::new(config.clone()),
        }
    }

    /// Update configuration (called on hot-reload). Recorded history is kept.
    pub fn update_config(&self, config: &RateLimitConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check the limit for `client` and count the request when it is allowed.
    pub fn acquire(&self, client: &str) -> RateLimitInfo {
        self.acquire_at(client, Instant::now())
    }

    pub fn acquire_at(&self, client: &str, now: Instant) -> RateLimitInfo {
        let config = self.config();
        if !config.enabled || config.requests == 0 {
            return RateLimitInfo {
                allowed: true,
                remaining: u32::MAX,
                limit: 0,
                reset_secs: 0,
            };
        }
        let period = config.period();
        let limit = config.requests;

        // Fast path: read lock
        {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = clients.get(client) {
                let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
                return admit(&mut window, now, period, limit);
            }
        }

        // Slow path: write lock to insert
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        if clients.len() >= SWEEP_THRESHOLD {
            clients.retain(|_, window| {
                window
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .count_and_prune(now, period)
                    > 0
            });
        }
        let window = clients
            .entry(client.to_string())
            .or_insert_with(|| Mutex::new(SlidingWindow::new()))
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        admit(window, now, period, limit)
    }

    /// Number of clients with a tracked window.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn admit(window: &mut SlidingWindow, now: Instant, period: Duration, limit: u32) -> RateLimitInfo {
    let count = window.count_and_prune(now, period);
    if count >= limit {
        return RateLimitInfo {
            allowed: false,
            remaining: 0,
            limit,
            reset_secs: window.reset_secs(now, period),
        };
    }
    window.timestamps.push_back(now);
    RateLimitInfo {
        allowed: true,
        remaining: limit - count - 1,
        limit,
        reset_secs: window.reset_secs(now, period),
    }
}
