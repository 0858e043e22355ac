//! Durable record of bridge transactions.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{BridgeStatus, BridgeTransaction, StatusChange};

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Lost the unique-key race on `deposit_tx_hash`.
    #[error("deposit {0} is already recorded")]
    DuplicateDeposit(String),

    #[error("bridge transaction not found: {0}")]
    NotFound(String),

    /// The guarded update matched no row: the record left `expected` first.
    #[error("transaction {id} is no longer {expected}")]
    StaleStatus { id: Uuid, expected: BridgeStatus },

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("ledger call timed out")]
    Timeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new record. Fails with `DuplicateDeposit` when a record with
    /// the same deposit hash exists, including one created concurrently.
    async fn create(&self, tx: &BridgeTransaction) -> LedgerResult<BridgeTransaction>;

    async fn find_by_deposit_hash(&self, deposit_tx_hash: &str)
        -> LedgerResult<Option<BridgeTransaction>>;

    async fn get(&self, id: Uuid) -> LedgerResult<BridgeTransaction>;

    /// Writes the whole of `next` if the stored record is still in `from`, and
    /// appends one transition-log entry attributed to `step`.
    async fn transition(
        &self,
        next: &BridgeTransaction,
        from: BridgeStatus,
        step: &str,
    ) -> LedgerResult<BridgeTransaction>;

    async fn history(&self, id: Uuid) -> LedgerResult<Vec<StatusChange>>;

    async fn list_by_status(
        &self,
        status: BridgeStatus,
        limit: i64,
    ) -> LedgerResult<Vec<BridgeTransaction>>;

    async fn ping(&self) -> LedgerResult<()>;
}
