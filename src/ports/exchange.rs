use async_trait::async_trait;
use thiserror::Error;

use crate::domain::TradingPair;

/// Every variant is fatal for the attempt: the exchange offers no order-level
/// idempotency token, so a failed sell is never retried automatically.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("exchange rejected credentials: {0}")]
    Authentication(String),
    #[error("exchange rejected order: {0}")]
    Rejected(String),
    #[error("exchange transport failure: {0}")]
    Transport(String),
    #[error("invalid exchange response: {0}")]
    InvalidResponse(String),
    #[error("exchange call timed out")]
    Timeout,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Places a limit sell of `amount` atomic base units at integer `price`
    /// and returns the broker order id.
    async fn sell(
        &self,
        pair: &TradingPair,
        amount: i64,
        price: i64,
    ) -> Result<String, ExchangeError>;
}
