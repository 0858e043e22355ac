pub mod adapters;
pub mod cli;
pub mod clients;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod shutdown;
pub mod startup;
pub mod use_cases;
pub mod utils;
pub mod validation;
pub mod watcher;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::ports::LedgerStore;
use crate::use_cases::{ConfirmPayout, ProcessDeposit};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub settlement: Arc<ProcessDeposit>,
    pub confirmations: Arc<ConfirmPayout>,
    pub callback_token: Arc<str>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/internal/deposit-webhook",
            post(handlers::webhook::deposit_webhook),
        )
        .route(
            "/internal/payout-callback",
            post(handlers::payout_callback::payout_callback),
        )
        .route("/transactions/:tx_hash", get(handlers::webhook::get_transaction))
        .layer(axum::middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(state)
}
