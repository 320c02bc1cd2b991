//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};
use ledger::LedgerError;

/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: u64 = 1;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Item not found.
    NotFound(String),
    /// Malformed item id, body or query.
    BadRequest(String),
    /// The ledger could not complete the request; safe to retry.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "ledger unavailable");
                let body = serde_json::json!({ "error": msg });
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                    axum::Json(body),
                )
                    .into_response();
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::InvalidArgument(_) => ApiError::BadRequest(err.to_string()),
            LedgerError::StoreUnavailable(_) | LedgerError::WorkerStopped(_) => {
                ApiError::Unavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ItemId;
    use ledger_store::LedgerStoreError;

    #[test]
    fn maps_ledger_errors_to_status_codes() {
        let item = ItemId::parse("A").unwrap();
        let cases = [
            (LedgerError::NotFound(item.clone()), StatusCode::NOT_FOUND),
            (
                LedgerError::InvalidArgument("delta is required".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                LedgerError::StoreUnavailable(LedgerStoreError::Unavailable {
                    attempts: 3,
                    reason: "pool timed out".to_string(),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (LedgerError::WorkerStopped(item), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn unavailable_sets_retry_after() {
        let response = ApiError::Unavailable("down".to_string()).into_response();
        assert_eq!(
            response.headers().get(RETRY_AFTER).unwrap(),
            &RETRY_AFTER_SECS.to_string()
        );
    }
}
