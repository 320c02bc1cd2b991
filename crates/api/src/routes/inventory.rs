//! Inventory read, set and adjust endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use ledger::{LedgerGateway, parse_delta, parse_set_payload};
use ledger_store::{LedgerStore, StockRecord};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LedgerStore> {
    pub gateway: LedgerGateway<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct AdjustParams {
    pub delta: Option<String>,
}

#[derive(Deserialize)]
pub struct LegacyUpdateParams {
    pub change: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct StockResponse {
    pub item_id: String,
    pub quantity: i64,
}

impl From<StockRecord> for StockResponse {
    fn from(record: StockRecord) -> Self {
        Self {
            item_id: record.item_id.to_string(),
            quantity: record.quantity,
        }
    }
}

#[derive(Serialize)]
pub struct LegacyStockResponse {
    pub stock: i64,
}

impl From<StockRecord> for LegacyStockResponse {
    fn from(record: StockRecord) -> Self {
        Self {
            stock: record.quantity,
        }
    }
}

type Shared<S> = State<std::sync::Arc<AppState<S>>>;

// -- Handlers --

/// GET /inventory/{item_id}: current quantity of an item.
#[tracing::instrument(skip(state))]
pub async fn get<S: LedgerStore + Clone + 'static>(
    State(state): Shared<S>,
    Path(item_id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let record = state.gateway.get(&item_id).await?;
    Ok(Json(record.into()))
}

/// PUT /inventory/{item_id}: replace the quantity with `{"quantity": n}`.
#[tracing::instrument(skip(state, body))]
pub async fn set<S: LedgerStore + Clone + 'static>(
    State(state): Shared<S>,
    Path(item_id): Path<String>,
    body: Bytes,
) -> Result<Json<StockResponse>, ApiError> {
    let kind = parse_set_payload(&body)?;
    let record = state.gateway.submit(&item_id, kind).await?;
    Ok(Json(record.into()))
}

/// POST /inventory/{item_id}/adjust?delta=n: add a signed delta.
#[tracing::instrument(skip(state, params))]
pub async fn adjust<S: LedgerStore + Clone + 'static>(
    State(state): Shared<S>,
    Path(item_id): Path<String>,
    Query(params): Query<AdjustParams>,
) -> Result<Json<StockResponse>, ApiError> {
    let kind = parse_delta(params.delta.as_deref())?;
    let record = state.gateway.submit(&item_id, kind).await?;
    Ok(Json(record.into()))
}

/// GET /api/inventory/{item_id}: legacy read, `{"stock": n}`.
pub async fn legacy_get<S: LedgerStore + Clone + 'static>(
    State(state): Shared<S>,
    Path(item_id): Path<String>,
) -> Result<Json<LegacyStockResponse>, ApiError> {
    let record = state.gateway.get(&item_id).await?;
    Ok(Json(record.into()))
}

/// PUT /api/inventory/{item_id}: legacy set, accepts `stock` or `quantity`.
pub async fn legacy_set<S: LedgerStore + Clone + 'static>(
    State(state): Shared<S>,
    Path(item_id): Path<String>,
    body: Bytes,
) -> Result<Json<LegacyStockResponse>, ApiError> {
    let kind = parse_set_payload(&body)?;
    let record = state.gateway.submit(&item_id, kind).await?;
    Ok(Json(record.into()))
}

/// POST /api/inventory/{item_id}/update?change=n: legacy adjust.
pub async fn legacy_update<S: LedgerStore + Clone + 'static>(
    State(state): Shared<S>,
    Path(item_id): Path<String>,
    Query(params): Query<LegacyUpdateParams>,
) -> Result<Json<LegacyStockResponse>, ApiError> {
    let kind = parse_delta(params.change.as_deref())?;
    let record = state.gateway.submit(&item_id, kind).await?;
    Ok(Json(record.into()))
}
