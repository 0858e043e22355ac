//! Deposit watcher.
//!
//! Polls confirmed blocks for stablecoin `Transfer` logs into the deposit
//! address and hands each one to a [`DepositSink`]. The block cursor only
//! moves past a window once every log in it was handed off, so an RPC
//! failure re-scans the window and downstream idempotency absorbs repeats.

pub mod rpc;
pub mod sink;

pub use rpc::JsonRpcLogSource;
pub use sink::WebhookSink;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::ports::{DepositDetected, DepositSink};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const BLOCK_WINDOW: u64 = 2_000;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLog {
    pub transaction_hash: Option<String>,
    pub block_number: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("log was removed by a reorg")]
    Removed,
    #[error("log has no transaction hash")]
    MissingTxHash,
    #[error("log is not an ERC-20 Transfer")]
    NotTransfer,
    #[error("log has no sender topic")]
    MissingSender,
    #[error("log has no value data")]
    MissingValue,
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("transfer value is zero")]
    ZeroValue,
    #[error("transfer value does not fit the ledger range")]
    ValueOutOfRange,
}

#[async_trait]
pub trait TransferLogSource: Send + Sync {
    async fn chain_id(&self) -> anyhow::Result<u64>;

    async fn head(&self) -> anyhow::Result<u64>;

    /// Transfer logs into the deposit address in `[from_block, to_block]`.
    async fn transfer_logs(&self, from_block: u64, to_block: u64) -> anyhow::Result<Vec<TransferLog>>;
}

/// Left-pads a 20-byte address into a 32-byte topic.
pub fn address_topic(address: &str) -> String {
    let digits = address.trim_start_matches("0x").to_ascii_lowercase();
    format!("0x{:0>64}", digits)
}

fn decode_word(field: &'static str, raw: &str) -> Result<[u8; 32], DropReason> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|_| DropReason::Malformed(field))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| DropReason::Malformed(field))
}

/// Extracts `(txHash, from, amount)` from a Transfer log.
pub fn decode_transfer(log: &TransferLog) -> Result<DepositDetected, DropReason> {
    if log.removed {
        return Err(DropReason::Removed);
    }

    let tx_hash = log
        .transaction_hash
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or(DropReason::MissingTxHash)?;
    decode_word("transaction hash", tx_hash)?;

    match log.topics.first() {
        Some(topic) if topic.eq_ignore_ascii_case(TRANSFER_TOPIC) => {}
        _ => return Err(DropReason::NotTransfer),
    }

    let from_word = decode_word(
        "sender topic",
        log.topics.get(1).ok_or(DropReason::MissingSender)?,
    )?;
    if from_word[..12].iter().any(|b| *b != 0) {
        return Err(DropReason::Malformed("sender topic"));
    }

    let value = decode_word("value", log.data.as_deref().ok_or(DropReason::MissingValue)?)?;
    if value[..24].iter().any(|b| *b != 0) {
        return Err(DropReason::ValueOutOfRange);
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&value[24..]);
    let amount = i64::try_from(u64::from_be_bytes(low)).map_err(|_| DropReason::ValueOutOfRange)?;
    if amount == 0 {
        return Err(DropReason::ZeroValue);
    }

    Ok(DepositDetected {
        tx_hash: tx_hash.to_ascii_lowercase(),
        from: format!("0x{}", hex::encode(&from_word[12..])),
        amount,
    })
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub expected_chain_id: u64,
    pub start_block: Option<u64>,
    pub confirmations: u64,
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight deliveries.
    pub shutdown_grace: Duration,
}

pub struct DepositWatcher {
    source: Arc<dyn TransferLogSource>,
    sink: Arc<dyn DepositSink>,
    settings: WatcherSettings,
}

impl DepositWatcher {
    pub fn new(
        source: Arc<dyn TransferLogSource>,
        sink: Arc<dyn DepositSink>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            source,
            sink,
            settings,
        }
    }

    /// Runs until `shutdown` flips to `true`. Only a chain id mismatch is fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut inflight = JoinSet::new();
        let mut backoff = INITIAL_BACKOFF;

        let mut cursor = loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match self.start_cursor().await {
                Ok(cursor) => break cursor,
                Err(StartError::Fatal(e)) => return Err(e),
                Err(StartError::Retry(e)) => {
                    tracing::warn!(error = %e, retry_in_secs = backoff.as_secs(), "Watcher start-up failed");
                    if wait_or_shutdown(backoff, &mut shutdown).await {
                        return Ok(());
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        };
        backoff = INITIAL_BACKOFF;

        tracing::info!(
            chain_id = self.settings.expected_chain_id,
            from_block = cursor,
            confirmations = self.settings.confirmations,
            "Deposit watcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.scan(&mut cursor, &mut inflight).await {
                Ok(()) => {
                    backoff = INITIAL_BACKOFF;
                    self.settings.poll_interval
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        cursor = cursor,
                        retry_in_secs = backoff.as_secs(),
                        "Log polling failed, reconnecting"
                    );
                    let delay = backoff;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    delay
                }
            };

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            let mut stopping = false;
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            stopping = true;
                            break;
                        }
                    }
                    Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                        log_joined(joined);
                    }
                }
                if *shutdown.borrow() {
                    stopping = true;
                    break;
                }
            }
            if stopping {
                break;
            }
        }

        self.drain(inflight).await;
        Ok(())
    }

    async fn start_cursor(&self) -> Result<u64, StartError> {
        let chain_id = self.source.chain_id().await.map_err(StartError::Retry)?;
        if chain_id != self.settings.expected_chain_id {
            return Err(StartError::Fatal(anyhow::anyhow!(
                "RPC serves chain {} but {} is configured",
                chain_id,
                self.settings.expected_chain_id
            )));
        }

        match self.settings.start_block {
            Some(block) => Ok(block),
            None => {
                let head = self.source.head().await.map_err(StartError::Retry)?;
                Ok(head.saturating_sub(self.settings.confirmations))
            }
        }
    }

    /// Scans confirmed blocks from `cursor` up to the current safe head,
    /// leaving `cursor` at the first block not yet handed off.
    async fn scan(&self, cursor: &mut u64, inflight: &mut JoinSet<()>) -> anyhow::Result<()> {
        let head = self.source.head().await?;
        let safe_head = head.saturating_sub(self.settings.confirmations);

        while *cursor <= safe_head {
            let from_block = *cursor;
            let to_block = (from_block + BLOCK_WINDOW - 1).min(safe_head);
            let logs = self.source.transfer_logs(from_block, to_block).await?;

            for log in &logs {
                match decode_transfer(log) {
                    Ok(deposit) => self.dispatch(deposit, inflight),
                    Err(reason) => tracing::warn!(
                        tx_hash = log.transaction_hash.as_deref().unwrap_or("-"),
                        block = log.block_number.as_deref().unwrap_or("-"),
                        reason = %reason,
                        "Dropping transfer log"
                    ),
                }
            }

            tracing::debug!(from_block, to_block, logs = logs.len(), "Scanned window");
            *cursor = to_block + 1;
        }

        Ok(())
    }

    fn dispatch(&self, deposit: DepositDetected, inflight: &mut JoinSet<()>) {
        tracing::info!(
            tx_hash = %deposit.tx_hash,
            from = %deposit.from,
            amount = deposit.amount,
            "Deposit detected"
        );
        let sink = self.sink.clone();
        inflight.spawn(async move {
            let tx_hash = deposit.tx_hash.clone();
            if let Err(e) = sink.deliver(deposit).await {
                tracing::error!(tx_hash = %tx_hash, error = %e, "Deposit delivery failed");
            }
        });
    }

    async fn drain(&self, mut inflight: JoinSet<()>) {
        if inflight.is_empty() {
            tracing::info!("Deposit watcher stopped");
            return;
        }

        tracing::info!(in_flight = inflight.len(), "Waiting for in-flight settlements");
        let drained = tokio::time::timeout(self.settings.shutdown_grace, async {
            while let Some(joined) = inflight.join_next().await {
                log_joined(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::error!(
                in_flight = inflight.len(),
                "Settlements still running at shutdown; check the ledger for records needing reconciliation"
            );
            inflight.detach_all();
        }
        tracing::info!("Deposit watcher stopped");
    }
}

enum StartError {
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

fn log_joined(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Deposit delivery task panicked");
    }
}

/// Sleeps for `delay`; returns `true` if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        changed = shutdown.changed() => {
            if changed.is_err() {
                return true;
            }
        }
    }
    *shutdown.borrow()
}
