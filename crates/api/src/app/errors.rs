use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ledgerd_infra::ledger_engine::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        LedgerError::InvalidMovement(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_movement", msg)
        }
        LedgerError::InsufficientLimit { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_limit",
            err.to_string(),
        ),
        LedgerError::StorageFailure(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_failure",
            err.to_string(),
        ),
        LedgerError::DeadlineExceeded { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "deadline_exceeded",
            err.to_string(),
        ),
    }
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
