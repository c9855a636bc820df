//! The single config reload path shared by the file watcher, SIGHUP and
//! `POST /api/admin/proxies/reload`.

use arc_swap::ArcSwap;
use quizgate_core::config::Config;
use quizgate_core::error::GatewayError;
use quizgate_core::health::HealthTracker;
use quizgate_core::rate_limit::RateLimiter;
use quizgate_core::registry::ProxyRegistry;
use quizgate_provider::Dispatcher;
use std::sync::Arc;

pub struct Reloader {
    config_path: String,
    config: Arc<ArcSwap<Config>>,
    registry: Arc<ProxyRegistry>,
    health: Arc<HealthTracker>,
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<RateLimiter>,
}

impl Reloader {
    pub fn new(
        config_path: impl Into<String>,
        config: Arc<ArcSwap<Config>>,
        registry: Arc<ProxyRegistry>,
        health: Arc<HealthTracker>,
        dispatcher: Arc<Dispatcher>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            config,
            registry,
            health,
            dispatcher,
            rate_limiter,
        }
    }

    /// Push `config` into the live components without publishing it. The
    /// proxy pool goes first; if it is rejected nothing else changes.
    pub fn apply(&self, config: &Config) -> Result<usize, GatewayError> {
        let proxies = self.registry.load(&config.third_party_apis)?;
        self.health.update_config(config.health.clone());
        self.dispatcher.update_config(config.dispatch.clone());
        self.rate_limiter.update_config(&config.rate_limit);
        tracing::info!(proxies, "Config applied");
        Ok(proxies)
    }

    /// Re-read the config file, apply it, then publish it. On any error the
    /// current config and pool stay in place.
    pub fn reload(&self) -> Result<usize, GatewayError> {
        let mut config =
            Config::load(&self.config_path).map_err(|e| GatewayError::Config(e.to_string()))?;
        let proxies = self.apply(&config).inspect_err(|e| {
            tracing::error!("Config reload rejected, keeping previous config: {e}");
        })?;

        // The listener is already bound; keep the address it was bound with.
        let current = self.config.load();
        config.host = current.host.clone();
        config.port = current.port;
        drop(current);

        self.config.store(Arc::new(config));
        Ok(proxies)
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }
}
