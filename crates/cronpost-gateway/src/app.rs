use axum::{
    routing::{get, post},
    Router,
};
use cronpost_core::config::CronpostConfig;
use cronpost_scheduler::DispatchEngine;
use std::sync::Arc;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CronpostConfig,
    pub engine: DispatchEngine,
}

impl AppState {
    pub fn new(config: CronpostConfig, engine: DispatchEngine) -> Self {
        Self { config, engine }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/dispatch", post(crate::http::dispatch::dispatch_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
