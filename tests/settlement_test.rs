mod common;

use common::{
    deposit, destination, Behavior, FakeExchange, FakePayouts, FakeRates, FlakyLedger, Harness,
};
use futures::future::join_all;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nusantara_bridge::adapters::InMemoryLedger;
use nusantara_bridge::domain::BridgeStatus;
use nusantara_bridge::ports::{ExchangeError, LedgerError, LedgerStore, PayoutError, RateError};
use nusantara_bridge::use_cases::{
    ConfirmError, ConfirmPayout, DepositOutcome, PayoutOutcome, ProcessDeposit, SettlementCause,
    Stage,
};

struct FlakyHarness {
    ledger: Arc<InMemoryLedger>,
    exchange: Arc<FakeExchange>,
    payouts: Arc<FakePayouts>,
    settlement: ProcessDeposit,
}

/// Happy clients over a ledger whose `fail_at`-th transition times out.
fn flaky_harness(fail_at: usize) -> FlakyHarness {
    let ledger = Arc::new(InMemoryLedger::new());
    let exchange = Arc::new(FakeExchange::new(Behavior::Succeed));
    let payouts = Arc::new(FakePayouts::new(Behavior::Succeed));
    let settlement = ProcessDeposit::new(
        Arc::new(FlakyLedger::new(ledger.clone(), fail_at)),
        Arc::new(FakeRates::bid("15850")),
        exchange.clone(),
        payouts.clone(),
        "usdc_idr".parse().unwrap(),
        destination(),
        Duration::from_secs(5),
    );
    FlakyHarness {
        ledger,
        exchange,
        payouts,
        settlement,
    }
}

#[tokio::test]
async fn end_to_end_deposit_reaches_payout_initiated() {
    let h = Harness::new(FakeRates::bid("15850.40"), Behavior::Succeed, Behavior::Succeed);

    let outcome = h.settlement.execute(deposit(1, 2_500_000)).await.unwrap();
    let tx = match outcome {
        DepositOutcome::PayoutInitiated(tx) => tx,
        other => panic!("expected payout initiation, got {:?}", other),
    };

    assert_eq!(tx.status, BridgeStatus::PayoutInitiated);
    assert_eq!(tx.stable_amount, 2_500_000);
    assert_eq!(tx.exchange_rate, 15_850);
    assert_eq!(tx.fiat_amount, 39_427);
    assert_eq!(tx.exchange_order_id.as_deref(), Some("80001"));
    assert_eq!(tx.payout_id, Some(format!("disb-{}", tx.id)));

    assert_eq!(*h.exchange.orders.lock().unwrap(), vec![(2_500_000, 15_850)]);

    let requests = h.payouts.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].idempotency_key, tx.id.to_string());
    assert_eq!(requests[0].amount_minor, 39_427);
    assert_eq!(requests[0].bank_code, "BCA");

    let stored = h.ledger.get(tx.id).await.unwrap();
    assert_eq!(stored, tx);
}

#[tokio::test]
async fn redelivery_is_a_no_op() {
    let h = Harness::happy();

    h.settlement.execute(deposit(2, 1_000_000)).await.unwrap();
    let second = h.settlement.execute(deposit(2, 1_000_000)).await.unwrap();

    assert_eq!(second, DepositOutcome::AlreadyProcessed);
    assert_eq!(h.ledger.len(), 1);
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.payouts.calls(), 1);
    assert_eq!(h.rates.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hash_case_variants_are_the_same_deposit() {
    let h = Harness::happy();

    let lower = deposit(0xab, 1_000_000);
    let mut upper = lower.clone();
    upper.tx_hash = upper.tx_hash.to_ascii_uppercase().replacen("0X", "0x", 1);

    h.settlement.execute(lower).await.unwrap();
    let second = h.settlement.execute(upper).await.unwrap();

    assert_eq!(second, DepositOutcome::AlreadyProcessed);
    assert_eq!(h.ledger.len(), 1);
}

#[tokio::test]
async fn concurrent_duplicates_create_exactly_one_record() {
    let h = Harness::happy();
    const N: usize = 8;

    let results = join_all((0..N).map(|_| h.settlement.execute(deposit(3, 1_000_000)))).await;

    let initiated = results
        .iter()
        .filter(|r| matches!(r, Ok(DepositOutcome::PayoutInitiated(_))))
        .count();
    let no_ops = results
        .iter()
        .filter(|r| matches!(r, Ok(DepositOutcome::AlreadyProcessed)))
        .count();

    assert_eq!(initiated, 1);
    assert_eq!(no_ops, N - 1);
    assert_eq!(h.ledger.len(), 1);
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.payouts.calls(), 1);
    // Every caller quoted before any of them created the record.
    assert_eq!(h.rates.calls.load(Ordering::SeqCst), N);
}

#[tokio::test]
async fn different_deposits_settle_independently() {
    let h = Harness::happy();

    let results = join_all((10..14).map(|seed| h.settlement.execute(deposit(seed, 1_000_000)))).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Ok(DepositOutcome::PayoutInitiated(_)))));
    assert_eq!(h.ledger.len(), 4);
}

#[tokio::test]
async fn failed_sell_is_recorded_and_never_paid_out() {
    let h = Harness::new(FakeRates::bid("15850"), Behavior::Fail, Behavior::Succeed);

    let err = h.settlement.execute(deposit(4, 2_500_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Sell);
    assert!(matches!(err.cause, SettlementCause::Exchange(ExchangeError::Rejected(_))));

    let id = err.transaction_id.expect("record exists after quote");
    let stored = h.ledger.get(id).await.unwrap();
    assert_eq!(stored.status, BridgeStatus::Failed);
    assert!(stored.exchange_order_id.is_none());
    assert!(stored.payout_id.is_none());
    assert_eq!(h.payouts.calls(), 0);

    // The failed record still absorbs redelivery.
    let again = h.settlement.execute(deposit(4, 2_500_000)).await.unwrap();
    assert_eq!(again, DepositOutcome::AlreadyProcessed);
    assert_eq!(h.exchange.calls(), 1);
}

#[tokio::test]
async fn failed_payout_keeps_the_order_id() {
    let h = Harness::new(FakeRates::bid("15850"), Behavior::Succeed, Behavior::Fail);

    let err = h.settlement.execute(deposit(5, 2_500_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Payout);

    let stored = h.ledger.get(err.transaction_id.unwrap()).await.unwrap();
    assert_eq!(stored.status, BridgeStatus::Failed);
    assert_eq!(stored.exchange_order_id.as_deref(), Some("80001"));
    assert!(stored.payout_id.is_none());

    let statuses: Vec<_> = h
        .ledger
        .history(stored.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.to_status)
        .collect();
    assert_eq!(
        statuses,
        vec![BridgeStatus::DepositConfirmed, BridgeStatus::Exchanged, BridgeStatus::Failed]
    );
}

#[tokio::test]
async fn quote_failure_leaves_no_record() {
    let h = Harness::new(FakeRates::unreachable(), Behavior::Succeed, Behavior::Succeed);

    let err = h.settlement.execute(deposit(6, 1_000_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Quote);
    assert!(err.transaction_id.is_none());
    assert!(h.ledger.is_empty());
    assert_eq!(h.exchange.calls(), 0);
}

#[tokio::test]
async fn dust_deposit_is_rejected_before_recording() {
    let h = Harness::happy();

    // 60 atomic units at 15850 is under one Rupiah.
    let err = h.settlement.execute(deposit(7, 60)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Quote);
    assert!(h.ledger.is_empty());
}

#[tokio::test]
async fn unavailable_store_fails_without_side_effects() {
    let h = Harness::happy();
    h.ledger.set_unavailable(true);

    let err = h.settlement.execute(deposit(8, 1_000_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Gate);
    assert_eq!(h.exchange.calls(), 0);

    h.ledger.set_unavailable(false);
    assert!(h.settlement.execute(deposit(8, 1_000_000)).await.is_ok());
}

#[tokio::test]
async fn hung_exchange_times_out_and_is_marked_failed() {
    let h = Harness::with_timeout(
        FakeRates::bid("15850"),
        Behavior::Hang,
        Behavior::Succeed,
        Duration::from_millis(100),
    );

    let err = h.settlement.execute(deposit(9, 1_000_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Sell);
    assert!(matches!(err.cause, SettlementCause::Exchange(ExchangeError::Timeout)));

    let stored = h.ledger.get(err.transaction_id.unwrap()).await.unwrap();
    assert_eq!(stored.status, BridgeStatus::Failed);
    assert_eq!(h.payouts.calls(), 0);
}

#[tokio::test]
async fn status_history_only_moves_forward() {
    let h = Harness::happy();

    let DepositOutcome::PayoutInitiated(tx) = h.settlement.execute(deposit(15, 3_000_000)).await.unwrap() else {
        panic!("expected payout initiation");
    };

    let history = h.ledger.history(tx.id).await.unwrap();
    let steps: Vec<_> = history.iter().map(|c| c.step.as_str()).collect();
    assert_eq!(steps, vec!["quote", "sell", "payout"]);

    assert!(history[0].from_status.is_none());
    for pair in history.windows(2) {
        assert_eq!(pair[1].from_status, Some(pair[0].to_status));
        assert!(pair[0].to_status.can_transition_to(pair[1].to_status));
    }
}

#[tokio::test]
async fn unrecorded_sell_keeps_the_accepted_order_id() {
    let h = flaky_harness(0);

    let err = h.settlement.execute(deposit(16, 2_500_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Sell);
    assert!(matches!(err.cause, SettlementCause::Ledger(LedgerError::Timeout)));

    let stored = h.ledger.get(err.transaction_id.unwrap()).await.unwrap();
    assert_eq!(stored.status, BridgeStatus::Failed);
    assert_eq!(stored.exchange_order_id.as_deref(), Some("80001"));
    assert!(stored.payout_id.is_none());
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.payouts.calls(), 0);
}

#[tokio::test]
async fn unrecorded_payout_keeps_the_accepted_payout_id() {
    let h = flaky_harness(1);

    let err = h.settlement.execute(deposit(17, 2_500_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Payout);

    let id = err.transaction_id.unwrap();
    let stored = h.ledger.get(id).await.unwrap();
    assert_eq!(stored.status, BridgeStatus::Failed);
    assert_eq!(stored.exchange_order_id.as_deref(), Some("80001"));
    assert_eq!(stored.payout_id, Some(format!("disb-{}", id)));
    assert_eq!(h.payouts.calls(), 1);

    let statuses: Vec<_> = h
        .ledger
        .history(id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.to_status)
        .collect();
    assert_eq!(
        statuses,
        vec![BridgeStatus::DepositConfirmed, BridgeStatus::Exchanged, BridgeStatus::Failed]
    );

    // The provider's later confirmation names the recorded payout, so it is
    // reported as contradicting the FAILED record rather than as a stranger.
    let confirm = ConfirmPayout::new(h.ledger.clone());
    let err = confirm
        .execute(id, Some(&format!("disb-{}", id)), PayoutOutcome::Succeeded, "callback")
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmError::Contradicts { status: BridgeStatus::Failed, .. }));
}

#[tokio::test]
async fn hung_payout_times_out_and_is_marked_failed() {
    let h = Harness::with_timeout(
        FakeRates::bid("15850"),
        Behavior::Succeed,
        Behavior::Hang,
        Duration::from_millis(100),
    );

    let err = h.settlement.execute(deposit(18, 1_000_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Payout);
    assert!(matches!(err.cause, SettlementCause::Payout(PayoutError::Timeout)));

    let stored = h.ledger.get(err.transaction_id.unwrap()).await.unwrap();
    assert_eq!(stored.status, BridgeStatus::Failed);
    assert_eq!(stored.exchange_order_id.as_deref(), Some("80001"));
    assert!(stored.payout_id.is_none());
    assert_eq!(h.payouts.calls(), 1);
}

#[tokio::test]
async fn hung_rate_oracle_times_out_before_any_record() {
    let h = Harness::with_timeout(
        FakeRates::hanging(),
        Behavior::Succeed,
        Behavior::Succeed,
        Duration::from_millis(100),
    );

    let err = h.settlement.execute(deposit(19, 1_000_000)).await.unwrap_err();
    assert_eq!(err.stage, Stage::Quote);
    assert!(matches!(err.cause, SettlementCause::Rate(RateError::Timeout)));
    assert!(err.transaction_id.is_none());
    assert!(h.ledger.is_empty());
    assert_eq!(h.exchange.calls(), 0);
}
