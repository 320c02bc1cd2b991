//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger_store::LedgerStore;
use serde::Serialize;

use super::inventory::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Items with mutations queued or in flight.
    pub active_items: usize,
}

/// GET /health: liveness plus the serializer's current load.
pub async fn check<S: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_items: state.gateway.serializer().active_items(),
    })
}
