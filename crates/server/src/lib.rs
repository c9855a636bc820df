pub mod answer;
pub mod auth;
pub mod handler;
pub mod middleware;
pub mod reload;

use answer::AnswerService;
use arc_swap::ArcSwap;
use axum::routing::{get, post};
use axum::{Router, middleware as axum_mw};
use quizgate_core::config::Config;
use quizgate_core::health::HealthTracker;
use quizgate_core::rate_limit::RateLimiter;
use quizgate_core::registry::ProxyRegistry;
use quizgate_provider::{Dispatcher, ProbeBoard};
use reload::Reloader;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub registry: Arc<ProxyRegistry>,
    pub health: Arc<HealthTracker>,
    pub dispatcher: Arc<Dispatcher>,
    pub answers: Arc<AnswerService>,
    pub probes: Arc<ProbeBoard>,
    pub rate_limiter: Arc<RateLimiter>,
    pub reloader: Arc<Reloader>,
    pub start_time: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/api/health", get(handler::health::health));

    let search_routes = Router::new()
        .route(
            "/api/search",
            get(handler::search::search_get).post(handler::search::search_post),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::search_auth_middleware,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ));

    let cache_routes = Router::new()
        .route("/api/cache/clear", post(handler::cache::clear_cache))
        .route("/api/cache/purge", post(handler::cache::purge_expired))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::cache_auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/health", get(handler::admin::health_status))
        .route("/api/admin/health/reset", post(handler::admin::reset_health))
        .route("/api/admin/health/{name}", get(handler::admin::proxy_health))
        .route(
            "/api/admin/failover/enable",
            post(handler::admin::enable_failover),
        )
        .route(
            "/api/admin/failover/disable",
            post(handler::admin::disable_failover),
        )
        .route(
            "/api/admin/failover/toggle",
            post(handler::admin::toggle_failover),
        )
        .route("/api/admin/proxies", get(handler::admin::proxies))
        .route(
            "/api/admin/proxies/reload",
            post(handler::admin::reload_proxies),
        )
        .route("/api/admin/probes", get(handler::admin::probes))
        .route("/api/admin/config", get(handler::admin::runtime_config))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::admin_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(search_routes)
        .merge(cache_routes)
        .merge(admin_routes)
        .layer(axum_mw::from_fn(
            middleware::request_logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
