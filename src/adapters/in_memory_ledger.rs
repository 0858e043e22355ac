//! Process-local LedgerStore for tests and dry runs.
//!
//! Mirrors the Postgres adapter's guarantees: unique deposit hash on create,
//! status-guarded transitions and one log entry per write.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{BridgeStatus, BridgeTransaction, StatusChange};
use crate::ports::{LedgerError, LedgerResult, LedgerStore};

#[derive(Default)]
struct State {
    by_id: HashMap<Uuid, BridgeTransaction>,
    by_hash: HashMap<String, Uuid>,
    changes: Vec<StatusChange>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails as if the database pool timed out.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> LedgerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn create(&self, tx: &BridgeTransaction) -> LedgerResult<BridgeTransaction> {
        self.check_available()?;
        let mut state = self.lock();

        if state.by_hash.contains_key(&tx.deposit_tx_hash) {
            return Err(LedgerError::DuplicateDeposit(tx.deposit_tx_hash.clone()));
        }

        state.by_hash.insert(tx.deposit_tx_hash.clone(), tx.id);
        state.by_id.insert(tx.id, tx.clone());
        state.changes.push(StatusChange {
            transaction_id: tx.id,
            from_status: None,
            to_status: tx.status,
            step: "quote".to_string(),
            created_at: Utc::now(),
        });

        Ok(tx.clone())
    }

    async fn find_by_deposit_hash(
        &self,
        deposit_tx_hash: &str,
    ) -> LedgerResult<Option<BridgeTransaction>> {
        self.check_available()?;
        let state = self.lock();
        Ok(state
            .by_hash
            .get(deposit_tx_hash)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn get(&self, id: Uuid) -> LedgerResult<BridgeTransaction> {
        self.check_available()?;
        self.lock()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn transition(
        &self,
        next: &BridgeTransaction,
        from: BridgeStatus,
        step: &str,
    ) -> LedgerResult<BridgeTransaction> {
        self.check_available()?;
        let mut state = self.lock();

        let current = state
            .by_id
            .get_mut(&next.id)
            .ok_or_else(|| LedgerError::NotFound(next.id.to_string()))?;

        if current.status != from {
            return Err(LedgerError::StaleStatus {
                id: next.id,
                expected: from,
            });
        }

        *current = next.clone();
        state.changes.push(StatusChange {
            transaction_id: next.id,
            from_status: Some(from),
            to_status: next.status,
            step: step.to_string(),
            created_at: Utc::now(),
        });

        Ok(next.clone())
    }

    async fn history(&self, id: Uuid) -> LedgerResult<Vec<StatusChange>> {
        self.check_available()?;
        Ok(self
            .lock()
            .changes
            .iter()
            .filter(|change| change.transaction_id == id)
            .cloned()
            .collect())
    }

    async fn list_by_status(
        &self,
        status: BridgeStatus,
        limit: i64,
    ) -> LedgerResult<Vec<BridgeTransaction>> {
        self.check_available()?;
        let mut matching: Vec<BridgeTransaction> = self
            .lock()
            .by_id
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|tx| tx.created_at);
        matching.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(matching)
    }

    async fn ping(&self) -> LedgerResult<()> {
        self.check_available()
    }
}
