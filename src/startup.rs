//! Wires configuration into the ledger, the clients and the watcher.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{postgres_ledger::create_pool, PostgresLedger};
use crate::clients::{IndodaxTicker, IndodaxTradeClient, XenditPayoutClient};
use crate::config::Config;
use crate::ports::{DepositSink, LedgerStore};
use crate::use_cases::{ConfirmPayout, ProcessDeposit};
use crate::watcher::{DepositWatcher, JsonRpcLogSource, WatcherSettings};
use crate::AppState;

const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn connect_ledger(config: &Config) -> Result<PostgresLedger> {
    let pool = create_pool(&config.database_url, DB_ACQUIRE_TIMEOUT)
        .await
        .context("connecting to DATABASE_URL")?;
    Ok(PostgresLedger::new(pool))
}

pub fn build_settlement(config: &Config, ledger: Arc<dyn LedgerStore>) -> ProcessDeposit {
    let ticker = IndodaxTicker::new(config.exchange.public_url.clone(), config.http_timeout);
    let exchange = IndodaxTradeClient::new(
        config.exchange.private_url.clone(),
        config.exchange.api_key.clone(),
        config.exchange.secret_key.clone(),
        config.http_timeout,
    );
    let payouts = XenditPayoutClient::new(
        config.payout.base_url.clone(),
        config.payout.secret_key.clone(),
        config.http_timeout,
    );
    tracing::info!(
        pair = %config.exchange.pair,
        bank_code = %config.destination.bank_code,
        "Settlement clients initialized"
    );

    ProcessDeposit::new(
        ledger,
        Arc::new(ticker),
        Arc::new(exchange),
        Arc::new(payouts),
        config.exchange.pair.clone(),
        config.destination.clone(),
        // Slightly above the client timeout so the transport error wins when both fire.
        config.http_timeout + Duration::from_secs(1),
    )
}

pub fn build_state(config: &Config, ledger: Arc<dyn LedgerStore>) -> (AppState, Arc<ProcessDeposit>) {
    let settlement = Arc::new(build_settlement(config, ledger.clone()));
    let state = AppState {
        ledger: ledger.clone(),
        settlement: settlement.clone(),
        confirmations: Arc::new(ConfirmPayout::new(ledger)),
        callback_token: Arc::from(config.payout.callback_token.as_str()),
    };
    (state, settlement)
}

pub fn build_watcher(config: &Config, sink: Arc<dyn DepositSink>) -> DepositWatcher {
    let watcher = &config.watcher;
    let source = JsonRpcLogSource::new(
        watcher.rpc_url.clone(),
        &watcher.contract_address,
        &watcher.deposit_address,
        config.http_timeout,
    );

    DepositWatcher::new(
        Arc::new(source),
        sink,
        WatcherSettings {
            expected_chain_id: watcher.chain_id,
            start_block: watcher.start_block,
            confirmations: watcher.confirmations,
            poll_interval: watcher.poll_interval,
            shutdown_grace: SHUTDOWN_GRACE,
        },
    )
}
