//! Bridge transaction domain entity.
//! One record per detected deposit, advanced by the settlement orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::fees::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeStatus {
    PendingDeposit,
    DepositConfirmed,
    Exchanged,
    PayoutInitiated,
    Completed,
    Failed,
}

impl BridgeStatus {
    pub const ALL: [BridgeStatus; 6] = [
        BridgeStatus::PendingDeposit,
        BridgeStatus::DepositConfirmed,
        BridgeStatus::Exchanged,
        BridgeStatus::PayoutInitiated,
        BridgeStatus::Completed,
        BridgeStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::PendingDeposit => "PENDING_DEPOSIT",
            BridgeStatus::DepositConfirmed => "DEPOSIT_CONFIRMED",
            BridgeStatus::Exchanged => "EXCHANGED",
            BridgeStatus::PayoutInitiated => "PAYOUT_INITIATED",
            BridgeStatus::Completed => "COMPLETED",
            BridgeStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeStatus::Completed | BridgeStatus::Failed)
    }

    /// Forward edges only. `Failed` is reachable from every state after the
    /// deposit was confirmed and before the record became terminal.
    pub fn can_transition_to(&self, next: BridgeStatus) -> bool {
        use BridgeStatus::*;
        matches!(
            (self, next),
            (PendingDeposit, DepositConfirmed)
                | (DepositConfirmed, Exchanged)
                | (Exchanged, PayoutInitiated)
                | (PayoutInitiated, Completed)
                | (DepositConfirmed, Failed)
                | (Exchanged, Failed)
                | (PayoutInitiated, Failed)
        )
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown bridge status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BridgeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        BridgeStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("transaction {id}: illegal transition {from} -> {to}")]
    Illegal {
        id: Uuid,
        from: BridgeStatus,
        to: BridgeStatus,
    },
}

/// Domain entity representing one bridged deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub id: Uuid,
    pub deposit_tx_hash: String,
    pub client_wallet_address: String,
    /// Atomic stablecoin units received on chain.
    pub stable_amount: i64,
    /// Integer fiat per whole stablecoin captured at quote time.
    pub exchange_rate: i64,
    /// Net fiat payout in minor units.
    pub fiat_amount: i64,
    pub exchange_order_id: Option<String>,
    pub payout_id: Option<String>,
    pub status: BridgeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeTransaction {
    /// A freshly confirmed deposit, priced by `quote`.
    pub fn confirmed(
        deposit_tx_hash: String,
        client_wallet_address: String,
        stable_amount: i64,
        quote: &Quote,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            deposit_tx_hash,
            client_wallet_address,
            stable_amount,
            exchange_rate: quote.rate,
            fiat_amount: quote.net_fiat,
            exchange_order_id: None,
            payout_id: None,
            status: BridgeStatus::DepositConfirmed,
            created_at: now,
            updated_at: now,
        }
    }

    fn advance(&self, to: BridgeStatus) -> Result<Self, TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                id: self.id,
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        next.updated_at = Utc::now();
        Ok(next)
    }

    pub fn exchanged(&self, order_id: String) -> Result<Self, TransitionError> {
        let mut next = self.advance(BridgeStatus::Exchanged)?;
        next.exchange_order_id = Some(order_id);
        Ok(next)
    }

    pub fn payout_initiated(&self, payout_id: String) -> Result<Self, TransitionError> {
        let mut next = self.advance(BridgeStatus::PayoutInitiated)?;
        next.payout_id = Some(payout_id);
        Ok(next)
    }

    pub fn completed(&self) -> Result<Self, TransitionError> {
        self.advance(BridgeStatus::Completed)
    }

    pub fn failed(&self) -> Result<Self, TransitionError> {
        self.advance(BridgeStatus::Failed)
    }
}

/// One row of the append-only transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub transaction_id: Uuid,
    /// `None` for the creating write.
    pub from_status: Option<BridgeStatus>,
    pub to_status: BridgeStatus,
    /// Which step produced the write, e.g. `quote`, `sell`, `payout`.
    pub step: String,
    pub created_at: DateTime<Utc>,
}
