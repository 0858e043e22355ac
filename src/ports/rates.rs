use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::domain::TradingPair;

#[derive(Error, Debug)]
pub enum RateError {
    #[error("rate oracle unreachable: {0}")]
    Unreachable(String),
    #[error("invalid ticker response: {0}")]
    InvalidResponse(String),
    #[error("no bid liquidity for {0}")]
    NoLiquidity(String),
    #[error("rate oracle timed out")]
    Timeout,
    #[error("rate oracle circuit breaker is open")]
    CircuitOpen,
}

#[async_trait]
pub trait RateOracle: Send + Sync {
    /// Highest resting bid for `pair`, in quote units per whole base unit.
    async fn best_bid(&self, pair: &TradingPair) -> Result<BigDecimal, RateError>;
}
