use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use ledgerd_core::AccountId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Ledger routes, mounted both under `/accounts` and the legacy `/clientes`.
pub fn router() -> Router {
    Router::new()
        .route("/accounts/:id/movements", post(apply_movement))
        .route("/accounts/:id/statement", get(statement))
        .route("/clientes/:id/transacoes", post(apply_movement))
        .route("/clientes/:id/extrato", get(statement))
}

pub async fn apply_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let account_id = match parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let body: dto::MovementBody = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_body", e.to_string());
        }
    };

    match services
        .ledger
        .apply_movement(account_id, body.into_request())
        .await
    {
        Ok(snapshot) => (StatusCode::OK, Json(dto::BalanceResponse::from(snapshot))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn statement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id = match parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.statement(account_id).await {
        Ok(statement) => {
            (StatusCode::OK, Json(dto::StatementResponse::from(statement))).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// A path id that is not an integer cannot name an account.
fn parse_account_id(raw: &str) -> Result<AccountId, axum::response::Response> {
    raw.parse::<AccountId>().map_err(|_| {
        errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("account {raw:?} not found"),
        )
    })
}
