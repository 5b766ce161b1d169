use axum::Router;

pub mod ledger;
pub mod system;

/// Router for the balance endpoints.
pub fn router() -> Router {
    ledger::router()
}
