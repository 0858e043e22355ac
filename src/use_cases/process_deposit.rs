//! Settlement orchestrator.
//!
//! Drives one detected deposit through quote, sell and payout. Every ledger
//! write is a guarded transition, and every failure after the record exists
//! is written as `FAILED` before it is returned.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::PayoutDestination;
use crate::domain::{BridgeStatus, BridgeTransaction, FeeError, Quote, TradingPair, TransitionError};
use crate::ports::{
    DepositDetected, DepositSink, ExchangeClient, ExchangeError, LedgerError, LedgerStore,
    PayoutClient, PayoutError, PayoutRequest, RateError, RateOracle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gate,
    Quote,
    Record,
    Sell,
    Payout,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Gate => "gate",
            Stage::Quote => "quote",
            Stage::Record => "record",
            Stage::Sell => "sell",
            Stage::Payout => "payout",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SettlementCause {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error(transparent)]
    Fee(#[from] FeeError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Payout(#[from] PayoutError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("rate {0} cannot be captured as an integer price")]
    UnrepresentableRate(String),
}

/// A failed settlement attempt. `transaction_id` is set once a record exists,
/// in which case that record has been marked `FAILED`.
#[derive(Error, Debug)]
#[error("settlement failed at {stage}: {cause}")]
pub struct SettlementError {
    pub stage: Stage,
    pub transaction_id: Option<Uuid>,
    #[source]
    pub cause: SettlementCause,
}

impl SettlementError {
    fn before_record(stage: Stage, cause: impl Into<SettlementCause>) -> Self {
        Self {
            stage,
            transaction_id: None,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    /// A record for this deposit hash already existed, or a concurrent call created it.
    AlreadyProcessed,
    PayoutInitiated(BridgeTransaction),
}

pub struct ProcessDeposit {
    ledger: Arc<dyn LedgerStore>,
    rates: Arc<dyn RateOracle>,
    exchange: Arc<dyn ExchangeClient>,
    payouts: Arc<dyn PayoutClient>,
    pair: TradingPair,
    destination: PayoutDestination,
    call_timeout: Duration,
}

impl ProcessDeposit {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        rates: Arc<dyn RateOracle>,
        exchange: Arc<dyn ExchangeClient>,
        payouts: Arc<dyn PayoutClient>,
        pair: TradingPair,
        destination: PayoutDestination,
        call_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            rates,
            exchange,
            payouts,
            pair,
            destination,
            call_timeout,
        }
    }

    pub async fn execute(&self, deposit: DepositDetected) -> Result<DepositOutcome, SettlementError> {
        let tx_hash = deposit.tx_hash.to_ascii_lowercase();
        let from = deposit.from.to_ascii_lowercase();

        let existing = self
            .bounded(self.ledger.find_by_deposit_hash(&tx_hash), LedgerError::Timeout)
            .await
            .map_err(|e| SettlementError::before_record(Stage::Gate, e))?;
        if let Some(existing) = existing {
            tracing::info!(
                tx_hash = %tx_hash,
                transaction_id = %existing.id,
                status = %existing.status,
                "Deposit already processed"
            );
            return Ok(DepositOutcome::AlreadyProcessed);
        }

        let quote = self.quote(deposit.amount).await?;
        let draft = BridgeTransaction::confirmed(tx_hash.clone(), from, deposit.amount, &quote);

        let confirmed = match self.bounded(self.ledger.create(&draft), LedgerError::Timeout).await {
            Ok(tx) => tx,
            Err(LedgerError::DuplicateDeposit(_)) => {
                tracing::info!(tx_hash = %tx_hash, "Lost creation race, deposit already processed");
                return Ok(DepositOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(SettlementError::before_record(Stage::Record, e)),
        };

        tracing::info!(
            tx_hash = %tx_hash,
            transaction_id = %confirmed.id,
            stable_amount = confirmed.stable_amount,
            rate = quote.rate,
            gross_fiat = quote.gross_fiat,
            fee = quote.fee,
            fiat_amount = quote.net_fiat,
            status = %confirmed.status,
            "Deposit confirmed"
        );

        let exchanged = self.sell(&confirmed).await?;
        let initiated = self.payout(&exchanged).await?;

        Ok(DepositOutcome::PayoutInitiated(initiated))
    }

    async fn quote(&self, amount: i64) -> Result<Quote, SettlementError> {
        let bid = self
            .bounded(self.rates.best_bid(&self.pair), RateError::Timeout)
            .await
            .map_err(|e| {
                tracing::warn!(pair = %self.pair, error = %e, "Rate query failed");
                SettlementError::before_record(Stage::Quote, e)
            })?;

        let rate = floor_rate(&bid).ok_or_else(|| {
            SettlementError::before_record(
                Stage::Quote,
                SettlementCause::UnrepresentableRate(bid.to_string()),
            )
        })?;

        Quote::compute(amount, rate).map_err(|e| SettlementError::before_record(Stage::Quote, e))
    }

    async fn sell(&self, confirmed: &BridgeTransaction) -> Result<BridgeTransaction, SettlementError> {
        let sold = self
            .bounded(
                self.exchange
                    .sell(&self.pair, confirmed.stable_amount, confirmed.exchange_rate),
                ExchangeError::Timeout,
            )
            .await;

        let order_id = match sold {
            Ok(order_id) => order_id,
            Err(e) => return Err(self.fail(confirmed, Stage::Sell, e.into()).await),
        };

        let next = confirmed
            .exchanged(order_id.clone())
            .map_err(|e| self.settlement_error(confirmed, Stage::Sell, e.into()))?;
        let exchanged = self.record(&next, confirmed, Stage::Sell).await?;

        tracing::info!(
            transaction_id = %exchanged.id,
            order_id = %order_id,
            status = %exchanged.status,
            "Sell order placed"
        );
        Ok(exchanged)
    }

    async fn payout(&self, exchanged: &BridgeTransaction) -> Result<BridgeTransaction, SettlementError> {
        let request = PayoutRequest {
            idempotency_key: exchanged.id.to_string(),
            amount_minor: exchanged.fiat_amount,
            bank_code: self.destination.bank_code.clone(),
            account_number: self.destination.account_number.clone(),
            account_name: self.destination.account_name.clone(),
        };

        let paid = self
            .bounded(self.payouts.payout(&request), PayoutError::Timeout)
            .await;

        let receipt = match paid {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(exchanged, Stage::Payout, e.into()).await),
        };

        let next = exchanged
            .payout_initiated(receipt.id.clone())
            .map_err(|e| self.settlement_error(exchanged, Stage::Payout, e.into()))?;
        let initiated = self.record(&next, exchanged, Stage::Payout).await?;

        tracing::info!(
            transaction_id = %initiated.id,
            payout_id = %receipt.id,
            channel_code = %receipt.channel_code,
            provider_status = %receipt.status,
            status = %initiated.status,
            "Payout initiated"
        );
        Ok(initiated)
    }

    /// Persists a successful step. If that write fails the external side effect
    /// already happened, so the record is marked `FAILED` for reconciliation,
    /// keeping the identifier the step produced.
    async fn record(
        &self,
        next: &BridgeTransaction,
        current: &BridgeTransaction,
        stage: Stage,
    ) -> Result<BridgeTransaction, SettlementError> {
        match self
            .bounded(
                self.ledger.transition(next, current.status, stage.as_str()),
                LedgerError::Timeout,
            )
            .await
        {
            Ok(tx) => Ok(tx),
            Err(e) => {
                tracing::error!(
                    transaction_id = %current.id,
                    order_id = ?next.exchange_order_id,
                    payout_id = ?next.payout_id,
                    stage = %stage,
                    error = %e,
                    "External step succeeded but could not be recorded"
                );
                Err(self.fail_from(next, current.status, stage, e.into()).await)
            }
        }
    }

    /// Marks `current` as `FAILED` and returns the original cause.
    async fn fail(
        &self,
        current: &BridgeTransaction,
        stage: Stage,
        cause: SettlementCause,
    ) -> SettlementError {
        self.fail_from(current, current.status, stage, cause).await
    }

    /// Writes `latest` as `FAILED`, guarded on the status the ledger still
    /// holds, so identifiers set on `latest` survive.
    async fn fail_from(
        &self,
        latest: &BridgeTransaction,
        stored_status: BridgeStatus,
        stage: Stage,
        cause: SettlementCause,
    ) -> SettlementError {
        tracing::warn!(
            transaction_id = %latest.id,
            tx_hash = %latest.deposit_tx_hash,
            stage = %stage,
            error = %cause,
            "Settlement step failed, marking transaction FAILED"
        );

        let mark = match latest.failed() {
            Ok(failed) => {
                self.bounded(
                    self.ledger.transition(&failed, stored_status, stage.as_str()),
                    LedgerError::Timeout,
                )
                .await
                .map(|_| ())
            }
            Err(e) => Err(LedgerError::Corrupt(e.to_string())),
        };

        if let Err(e) = mark {
            tracing::error!(
                transaction_id = %latest.id,
                tx_hash = %latest.deposit_tx_hash,
                status = %stored_status,
                order_id = ?latest.exchange_order_id,
                payout_id = ?latest.payout_id,
                error = %e,
                "Could not mark transaction FAILED; needs manual reconciliation"
            );
        }

        self.settlement_error(latest, stage, cause)
    }

    fn settlement_error(
        &self,
        current: &BridgeTransaction,
        stage: Stage,
        cause: SettlementCause,
    ) -> SettlementError {
        SettlementError {
            stage,
            transaction_id: Some(current.id),
            cause,
        }
    }

    async fn bounded<T, E, F>(&self, call: F, on_timeout: E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout),
        }
    }
}

/// Floors a decimal bid to the exchange's integer price step.
fn floor_rate(bid: &BigDecimal) -> Option<i64> {
    bid.with_scale(0).to_string().parse::<i64>().ok()
}

#[async_trait]
impl DepositSink for ProcessDeposit {
    async fn deliver(&self, deposit: DepositDetected) -> anyhow::Result<()> {
        match self.execute(deposit).await? {
            DepositOutcome::AlreadyProcessed | DepositOutcome::PayoutInitiated(_) => Ok(()),
        }
    }
}
