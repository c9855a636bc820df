//! Server assembly: proxy pool, health tracking, dispatch, cache and HTTP.

use crate::cli::RunArgs;
use arc_swap::ArcSwap;
use quizgate_core::cache::MemoryAnswerCache;
use quizgate_core::config::{Config, ConfigWatcher};
use quizgate_core::health::HealthTracker;
use quizgate_core::lifecycle::signal::SignalHandler;
use quizgate_core::provider::ChatExecutor;
use quizgate_core::rate_limit::RateLimiter;
use quizgate_core::registry::{FileProxySource, ProxyRegistry};
use quizgate_core::store::MemoryQuestionStore;
use quizgate_provider::{Dispatcher, HealthProbe, OpenAICompatExecutor, ProbeBoard};
use quizgate_server::answer::AnswerService;
use quizgate_server::reload::Reloader;
use quizgate_server::{AppState, build_router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    app_router: axum::Router,
    reloader: Arc<Reloader>,
    probe: Option<HealthProbe>,
}

impl Application {
    /// Load config and the proxy pool, then wire up every component. A pool
    /// that fails to load is fatal here since there is nothing to fall back to.
    pub fn build(config_path: &str, args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Config::load(config_path)?;
        if let Some(ref host) = args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }

        let registry = Arc::new(ProxyRegistry::from_source(FileProxySource::new(
            config_path,
        ))?);
        let stats = registry.stats();
        tracing::info!(
            "Loaded {} proxies ({} active), {} keys, {} models",
            stats.total_proxies,
            stats.active_proxies,
            stats.total_keys,
            stats.total_models,
        );
        if stats.active_proxies == 0 {
            tracing::warn!("No active proxies configured; searches will fail until the pool is reloaded");
        }

        let health = Arc::new(HealthTracker::new(config.health.clone()));
        let executor: Arc<dyn ChatExecutor> = Arc::new(OpenAICompatExecutor::from_config(
            config.proxy_url.as_deref(),
            &config.dispatch,
        )?);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            health.clone(),
            executor.clone(),
            config.dispatch.clone(),
        ));

        let probes = Arc::new(ProbeBoard::new());
        let probe = config.probe.enabled.then(|| {
            HealthProbe::spawn(
                registry.clone(),
                executor,
                probes.clone(),
                Duration::from_secs(config.probe.interval_secs),
                Duration::from_secs(config.probe.timeout_secs),
            )
        });

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let config = Arc::new(ArcSwap::from_pointee(config));
        let answers = Arc::new(AnswerService::new(
            config.clone(),
            dispatcher.clone(),
            Arc::new(MemoryAnswerCache::new()),
            Arc::new(MemoryQuestionStore::new()),
        ));
        let reloader = Arc::new(Reloader::new(
            config_path,
            config.clone(),
            registry.clone(),
            health.clone(),
            dispatcher.clone(),
            rate_limiter.clone(),
        ));

        let state = AppState {
            config: config.clone(),
            registry,
            health,
            dispatcher,
            answers,
            probes,
            rate_limiter,
            reloader: reloader.clone(),
            start_time: Instant::now(),
        };

        Ok(Self {
            config,
            app_router: build_router(state),
            reloader,
            probe,
        })
    }

    /// Serve until SIGINT/SIGTERM, reloading on file change and SIGHUP.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            config,
            app_router,
            reloader,
            probe,
        } = self;

        // The watcher publishes the new config itself once `apply` accepts it.
        let watcher_reloader = reloader.clone();
        let _watcher = ConfigWatcher::start(
            reloader.config_path().to_string(),
            config.clone(),
            move |new_cfg| {
                watcher_reloader.apply(new_cfg)?;
                Ok(())
            },
        )
        .inspect_err(|e| tracing::warn!("Config file watching disabled: {e}"))
        .ok();

        let (signal_handler, mut shutdown_rx) = SignalHandler::new();
        let reload_fn = move || {
            if let Err(e) = reloader.reload() {
                tracing::error!("SIGHUP reload failed: {e}");
            }
        };
        tokio::spawn(async move {
            if let Err(e) = signal_handler.run(reload_fn).await {
                tracing::error!("Signal handler failed: {e}");
            }
        });

        let addr = {
            let cfg = config.load();
            format!("{}:{}", cfg.host, cfg.port)
        };
        tracing::info!("Starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
        };
        axum::serve(
            listener,
            app_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        if let Some(probe) = probe {
            probe.stop().await;
        }
        tracing::info!("Server shut down.");
        Ok(())
    }
}
