use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/reset", post(reset))
        .route("/get", post(get_balance))
        .route("/charge", post(charge))
}

pub async fn reset(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let account = match dto::parse_body::<dto::AccountRequest>(&body) {
        Ok(req) => req.account(),
        Err(resp) => return resp,
    };

    match services.reset(&account).await {
        Ok(()) => {
            tracing::info!(%account, "successfully reset account");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::ledger_error_to_response("reset", e),
    }
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let account = match dto::parse_body::<dto::AccountRequest>(&body) {
        Ok(req) => req.account(),
        Err(resp) => return resp,
    };

    match services.balance(&account).await {
        Ok(balance) => {
            tracing::info!(%account, %balance, "remaining balance");
            (
                StatusCode::OK,
                Json(dto::BalanceResponse {
                    balance: balance.credits(),
                }),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response("get", e),
    }
}

pub async fn charge(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let (account, amount) = match dto::parse_body::<dto::ChargeRequest>(&body) {
        Ok(req) => req.into_parts(),
        Err(resp) => return resp,
    };

    tracing::info!(%account, amount, "charging account");
    match services.charge(&account, amount).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::ledger_error_to_response("charge", e),
    }
}
