use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A confirmed on-chain transfer into the deposit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositDetected {
    pub tx_hash: String,
    pub from: String,
    /// Atomic stablecoin units.
    pub amount: i64,
}

/// Where the watcher hands detected deposits.
#[async_trait]
pub trait DepositSink: Send + Sync {
    async fn deliver(&self, deposit: DepositDetected) -> anyhow::Result<()>;
}
