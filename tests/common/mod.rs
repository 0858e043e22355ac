#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nusantara_bridge::adapters::InMemoryLedger;
use uuid::Uuid;

use nusantara_bridge::config::PayoutDestination;
use nusantara_bridge::domain::{BridgeStatus, BridgeTransaction, StatusChange, TradingPair};
use nusantara_bridge::ports::{
    DepositDetected, ExchangeClient, ExchangeError, LedgerError, LedgerResult, LedgerStore,
    PayoutClient, PayoutError, PayoutReceipt, PayoutRequest, RateError, RateOracle,
};
use nusantara_bridge::use_cases::{ConfirmPayout, ProcessDeposit};
use nusantara_bridge::AppState;

pub const CALLBACK_TOKEN: &str = "test-callback-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
}

pub struct FakeRates {
    bid: Option<BigDecimal>,
    hang: bool,
    pub calls: AtomicUsize,
}

impl FakeRates {
    pub fn bid(raw: &str) -> Self {
        Self {
            bid: Some(BigDecimal::from_str(raw).unwrap()),
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            bid: None,
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::bid("15850")
        }
    }
}

#[async_trait]
impl RateOracle for FakeRates {
    async fn best_bid(&self, _pair: &TradingPair) -> Result<BigDecimal, RateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers all pass the idempotency gate first.
        tokio::task::yield_now().await;
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.bid
            .clone()
            .ok_or_else(|| RateError::Unreachable("connection refused".into()))
    }
}

pub struct FakeExchange {
    behavior: Behavior,
    pub orders: Mutex<Vec<(i64, i64)>>,
}

impl FakeExchange {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn sell(&self, _pair: &TradingPair, amount: i64, price: i64) -> Result<String, ExchangeError> {
        let n = {
            let mut orders = self.orders.lock().unwrap();
            orders.push((amount, price));
            orders.len()
        };
        match self.behavior {
            Behavior::Succeed => Ok(format!("{}", 80_000 + n)),
            Behavior::Fail => Err(ExchangeError::Rejected("Minimum order 10000 IDR".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("never".into())
            }
        }
    }
}

pub struct FakePayouts {
    behavior: Behavior,
    pub requests: Mutex<Vec<PayoutRequest>>,
}

impl FakePayouts {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PayoutClient for FakePayouts {
    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, PayoutError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.behavior {
            Behavior::Succeed => Ok(PayoutReceipt {
                id: format!("disb-{}", request.idempotency_key),
                external_id: request.idempotency_key.clone(),
                amount: request.amount_minor,
                channel_code: "ID_BCA".into(),
                status: "ACCEPTED".into(),
            }),
            Behavior::Fail => Err(PayoutError::Rejected {
                status: 400,
                body: r#"{"error_code":"INVALID_DESTINATION"}"#.into(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(PayoutError::Timeout)
            }
        }
    }
}

/// Delegates to an `InMemoryLedger`, but the `fail_at`-th call to `transition`
/// (zero-based) times out without writing.
pub struct FlakyLedger {
    inner: Arc<InMemoryLedger>,
    fail_at: usize,
    transitions: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: Arc<InMemoryLedger>, fail_at: usize) -> Self {
        Self {
            inner,
            fail_at,
            transitions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn create(&self, tx: &BridgeTransaction) -> LedgerResult<BridgeTransaction> {
        self.inner.create(tx).await
    }

    async fn find_by_deposit_hash(&self, hash: &str) -> LedgerResult<Option<BridgeTransaction>> {
        self.inner.find_by_deposit_hash(hash).await
    }

    async fn get(&self, id: Uuid) -> LedgerResult<BridgeTransaction> {
        self.inner.get(id).await
    }

    async fn transition(
        &self,
        next: &BridgeTransaction,
        from: BridgeStatus,
        step: &str,
    ) -> LedgerResult<BridgeTransaction> {
        if self.transitions.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(LedgerError::Timeout);
        }
        self.inner.transition(next, from, step).await
    }

    async fn history(&self, id: Uuid) -> LedgerResult<Vec<StatusChange>> {
        self.inner.history(id).await
    }

    async fn list_by_status(
        &self,
        status: BridgeStatus,
        limit: i64,
    ) -> LedgerResult<Vec<BridgeTransaction>> {
        self.inner.list_by_status(status, limit).await
    }

    async fn ping(&self) -> LedgerResult<()> {
        self.inner.ping().await
    }
}

pub fn destination() -> PayoutDestination {
    PayoutDestination {
        bank_code: "BCA".into(),
        account_number: "1234567890".into(),
        account_name: "Siti Rahayu".into(),
    }
}

/// A well-formed deposit whose hash is derived from `seed`.
pub fn deposit(seed: u8, amount: i64) -> DepositDetected {
    DepositDetected {
        tx_hash: format!("0x{}", format!("{:02x}", seed).repeat(32)),
        from: "0xab5801a7d398351b8be11c439e05c5b3259aec9b".into(),
        amount,
    }
}

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub rates: Arc<FakeRates>,
    pub exchange: Arc<FakeExchange>,
    pub payouts: Arc<FakePayouts>,
    pub settlement: Arc<ProcessDeposit>,
}

impl Harness {
    pub fn new(rates: FakeRates, exchange: Behavior, payouts: Behavior) -> Self {
        Self::with_timeout(rates, exchange, payouts, Duration::from_secs(5))
    }

    pub fn with_timeout(
        rates: FakeRates,
        exchange: Behavior,
        payouts: Behavior,
        call_timeout: Duration,
    ) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let rates = Arc::new(rates);
        let exchange = Arc::new(FakeExchange::new(exchange));
        let payouts = Arc::new(FakePayouts::new(payouts));

        let settlement = Arc::new(ProcessDeposit::new(
            ledger.clone(),
            rates.clone(),
            exchange.clone(),
            payouts.clone(),
            "usdc_idr".parse().unwrap(),
            destination(),
            call_timeout,
        ));

        Self {
            ledger,
            rates,
            exchange,
            payouts,
            settlement,
        }
    }

    pub fn happy() -> Self {
        Self::new(FakeRates::bid("15850"), Behavior::Succeed, Behavior::Succeed)
    }

    pub fn app_state(&self) -> AppState {
        let ledger: Arc<dyn LedgerStore> = self.ledger.clone();
        AppState {
            ledger: ledger.clone(),
            settlement: self.settlement.clone(),
            confirmations: Arc::new(ConfirmPayout::new(ledger)),
            callback_token: Arc::from(CALLBACK_TOKEN),
        }
    }
}
