use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use chargeflow_infra::LedgerError;

/// Stable machine-readable code for a ledger failure.
pub fn ledger_error_code(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::StoreUnavailable(_) => "store_unavailable",
        LedgerError::ConflictExhausted { .. } => "conflict_exhausted",
        LedgerError::NotInitialized { .. } => "not_initialized",
        LedgerError::MalformedState { .. } => "malformed_state",
    }
}

/// Every ledger failure is a server-side error; the `error` code tells
/// "retry later" (`conflict_exhausted`) apart from the rest.
pub fn ledger_error_to_response(operation: &'static str, err: LedgerError) -> axum::response::Response {
    let code = ledger_error_code(&err);
    tracing::error!(operation, code, error = %err, "ledger operation failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
