use axum::{
    routing::{get, post},
    Router,
};
use covenant_core::config::CovenantConfig;
use covenant_scheduler::Scheduler;
use covenant_subscriptions::{Page, SubscriptionRegistry};
use std::sync::Arc;

use crate::http::{health, subscriptions};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CovenantConfig,
    pub registry: Arc<SubscriptionRegistry>,
    /// Shares the registry with the background loop; `POST /subscription/time`
    /// ticks through the same claims.
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(
        config: CovenantConfig,
        registry: Arc<SubscriptionRegistry>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
        }
    }

    /// Listing window from query parameters, bounded by `[paging]`.
    pub fn page(&self, offset: Option<usize>, limit: Option<usize>) -> Page {
        Page::bounded(
            offset.unwrap_or(0),
            limit.unwrap_or(0),
            self.config.paging.default_limit,
            self.config.paging.max_limit,
        )
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/subscription",
            post(subscriptions::new).get(subscriptions::view_all),
        )
        .route("/subscription/time", post(subscriptions::time))
        .route(
            "/subscription/{id}",
            get(subscriptions::view)
                .put(subscriptions::update)
                .delete(subscriptions::delete),
        )
        .route("/subscription/{id}/pause", post(subscriptions::pause))
        .route("/subscription/{id}/resume", post(subscriptions::resume))
        .route("/subscription/roaster/{id}", get(subscriptions::view_by_roaster))
        .route("/subscription/user/{id}", get(subscriptions::view_by_user))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
