use axum::body::Bytes;
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chargeflow_core::AccountKey;

use crate::app::errors;

/// Credits deducted by `/charge` when the request does not say.
pub const DEFAULT_CHARGES: u64 = 10;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `/reset` and `/get`.
#[derive(Debug, Default, Deserialize)]
pub struct AccountRequest {
    pub account: Option<AccountKey>,
}

impl AccountRequest {
    pub fn account(self) -> AccountKey {
        self.account.unwrap_or_default()
    }
}

/// Body of `/charge`.
#[derive(Debug, Default, Deserialize)]
pub struct ChargeRequest {
    pub account: Option<AccountKey>,
    pub charges: Option<u64>,
}

impl ChargeRequest {
    pub fn into_parts(self) -> (AccountKey, u64) {
        (
            self.account.unwrap_or_default(),
            self.charges.unwrap_or(DEFAULT_CHARGES),
        )
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: u64,
}

/// Decode a JSON body, treating an empty body as `{}` so every field falls back
/// to its default. Content-Type is not checked.
pub fn parse_body<T>(body: &Bytes) -> Result<T, axum::response::Response>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(body).map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    })
}
