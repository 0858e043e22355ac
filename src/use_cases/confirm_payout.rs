//! External confirmation of a handed-off payout: `PAYOUT_INITIATED` to
//! `COMPLETED` or `FAILED`, driven by the provider callback or an operator.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{BridgeStatus, BridgeTransaction};
use crate::ports::{LedgerError, LedgerStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutOutcome {
    Succeeded,
    Failed,
}

impl PayoutOutcome {
    /// Maps a provider status. Intermediate statuses map to `None`.
    pub fn from_provider_status(status: &str) -> Option<Self> {
        match status.trim().to_ascii_uppercase().as_str() {
            "SUCCEEDED" | "COMPLETED" => Some(PayoutOutcome::Succeeded),
            "FAILED" | "REVERSED" | "CANCELLED" => Some(PayoutOutcome::Failed),
            _ => None,
        }
    }

    fn target(&self) -> BridgeStatus {
        match self {
            PayoutOutcome::Succeeded => BridgeStatus::Completed,
            PayoutOutcome::Failed => BridgeStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Applied(BridgeTransaction),
    /// The record already carries this outcome.
    AlreadyApplied(BridgeTransaction),
}

#[derive(Error, Debug)]
pub enum ConfirmError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("payout id {got} does not match recorded payout {expected:?}")]
    PayoutMismatch { expected: Option<String>, got: String },

    #[error("transaction {id} is already {status}")]
    Contradicts { id: Uuid, status: BridgeStatus },

    #[error("transaction {id} is {status}, not awaiting payout confirmation")]
    NotAwaitingPayout { id: Uuid, status: BridgeStatus },
}

pub struct ConfirmPayout {
    ledger: Arc<dyn LedgerStore>,
}

impl ConfirmPayout {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Applies `outcome` to transaction `id`. When `payout_id` is given it must
    /// equal the identifier recorded at payout initiation.
    pub async fn execute(
        &self,
        id: Uuid,
        payout_id: Option<&str>,
        outcome: PayoutOutcome,
        step: &str,
    ) -> Result<ConfirmOutcome, ConfirmError> {
        let current = self.ledger.get(id).await?;

        if let Some(got) = payout_id {
            if current.payout_id.as_deref() != Some(got) {
                return Err(ConfirmError::PayoutMismatch {
                    expected: current.payout_id.clone(),
                    got: got.to_string(),
                });
            }
        }

        if let Some(settled) = Self::settled(&current, outcome)? {
            return Ok(settled);
        }

        let next = match outcome {
            PayoutOutcome::Succeeded => current.completed(),
            PayoutOutcome::Failed => current.failed(),
        }
        .map_err(|_| ConfirmError::NotAwaitingPayout {
            id,
            status: current.status,
        })?;

        match self.ledger.transition(&next, current.status, step).await {
            Ok(updated) => {
                tracing::info!(
                    transaction_id = %id,
                    payout_id = ?updated.payout_id,
                    status = %updated.status,
                    step = step,
                    "Payout confirmation applied"
                );
                Ok(ConfirmOutcome::Applied(updated))
            }
            Err(LedgerError::StaleStatus { .. }) => {
                // A concurrent confirmation got there first.
                let latest = self.ledger.get(id).await?;
                Self::settled(&latest, outcome)?.ok_or(ConfirmError::NotAwaitingPayout {
                    id,
                    status: latest.status,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn settled(
        current: &BridgeTransaction,
        outcome: PayoutOutcome,
    ) -> Result<Option<ConfirmOutcome>, ConfirmError> {
        if current.status == outcome.target() {
            return Ok(Some(ConfirmOutcome::AlreadyApplied(current.clone())));
        }
        if current.status.is_terminal() {
            return Err(ConfirmError::Contradicts {
                id: current.id,
                status: current.status,
            });
        }
        if current.status != BridgeStatus::PayoutInitiated {
            return Err(ConfirmError::NotAwaitingPayout {
                id: current.id,
                status: current.status,
            });
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::domain::Quote;

    async fn initiated(ledger: &InMemoryLedger) -> BridgeTransaction {
        let quote = Quote::compute(2_500_000, 15_850).unwrap();
        let tx = BridgeTransaction::confirmed("0xaa".into(), "0xbb".into(), 2_500_000, &quote);
        let tx = ledger.create(&tx).await.unwrap();
        let ex = tx.exchanged("80123".into()).unwrap();
        let ex = ledger.transition(&ex, tx.status, "sell").await.unwrap();
        let po = ex.payout_initiated("disb-1".into()).unwrap();
        ledger.transition(&po, ex.status, "payout").await.unwrap()
    }

    #[test]
    fn provider_statuses_map_to_outcomes() {
        assert_eq!(PayoutOutcome::from_provider_status("SUCCEEDED"), Some(PayoutOutcome::Succeeded));
        assert_eq!(PayoutOutcome::from_provider_status("completed"), Some(PayoutOutcome::Succeeded));
        assert_eq!(PayoutOutcome::from_provider_status("REVERSED"), Some(PayoutOutcome::Failed));
        assert_eq!(PayoutOutcome::from_provider_status("ACCEPTED"), None);
    }

    #[tokio::test]
    async fn success_completes_then_repeats_are_no_ops() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tx = initiated(&ledger).await;
        let confirm = ConfirmPayout::new(ledger.clone());

        let first = confirm
            .execute(tx.id, Some("disb-1"), PayoutOutcome::Succeeded, "callback")
            .await
            .unwrap();
        assert!(matches!(first, ConfirmOutcome::Applied(ref t) if t.status == BridgeStatus::Completed));

        let again = confirm
            .execute(tx.id, Some("disb-1"), PayoutOutcome::Succeeded, "callback")
            .await
            .unwrap();
        assert!(matches!(again, ConfirmOutcome::AlreadyApplied(_)));

        let contradict = confirm
            .execute(tx.id, Some("disb-1"), PayoutOutcome::Failed, "callback")
            .await
            .unwrap_err();
        assert!(matches!(contradict, ConfirmError::Contradicts { .. }));
    }

    #[tokio::test]
    async fn mismatched_payout_id_is_rejected() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tx = initiated(&ledger).await;
        let confirm = ConfirmPayout::new(ledger.clone());

        let err = confirm
            .execute(tx.id, Some("disb-other"), PayoutOutcome::Succeeded, "callback")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::PayoutMismatch { .. }));
        assert_eq!(ledger.get(tx.id).await.unwrap().status, BridgeStatus::PayoutInitiated);
    }

    #[tokio::test]
    async fn record_not_yet_handed_off_cannot_be_confirmed() {
        let ledger = Arc::new(InMemoryLedger::new());
        let quote = Quote::compute(1_000_000, 15_000).unwrap();
        let tx = BridgeTransaction::confirmed("0xcc".into(), "0xdd".into(), 1_000_000, &quote);
        let tx = ledger.create(&tx).await.unwrap();

        let err = ConfirmPayout::new(ledger.clone())
            .execute(tx.id, None, PayoutOutcome::Succeeded, "force_complete")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::NotAwaitingPayout { .. }));
    }
}
