//! HTTP gateway for the stock ledger.
//!
//! Exposes get / set / adjust over REST (plus the legacy `/api/inventory`
//! routes), with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger::{LedgerGateway, MutationSerializer};
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::inventory::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/inventory/{item_id}",
            get(routes::inventory::get::<S>).put(routes::inventory::set::<S>),
        )
        .route(
            "/inventory/{item_id}/adjust",
            post(routes::inventory::adjust::<S>),
        )
        .route(
            "/api/inventory/{item_id}",
            get(routes::inventory::legacy_get::<S>).put(routes::inventory::legacy_set::<S>),
        )
        .route(
            "/api/inventory/{item_id}/update",
            post(routes::inventory::legacy_update::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a serializer shared with the intake.
pub fn create_state<S: LedgerStore + Clone + 'static>(
    serializer: MutationSerializer<S>,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        gateway: LedgerGateway::new(serializer),
    })
}
