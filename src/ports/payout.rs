use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayoutError {
    /// Raised before any network call.
    #[error("unsupported bank or e-wallet code: {0}")]
    UnknownChannel(String),
    #[error("payout amount out of range: {0}")]
    AmountOutOfRange(i64),
    #[error("payout provider rejected credentials: {0}")]
    Authentication(String),
    #[error("payout rejected [{status}]: {body}")]
    Rejected { status: u16, body: String },
    #[error("payout transport failure: {0}")]
    Transport(String),
    #[error("invalid payout response: {0}")]
    InvalidResponse(String),
    #[error("payout call timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    /// Sent as the provider's idempotency key and `external_id`.
    pub idempotency_key: String,
    pub amount_minor: i64,
    /// Internal bank or e-wallet code, e.g. `BCA` or `GOPAY`.
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutReceipt {
    pub id: String,
    pub external_id: String,
    pub amount: i64,
    pub channel_code: String,
    pub status: String,
}

#[async_trait]
pub trait PayoutClient: Send + Sync {
    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, PayoutError>;
}
