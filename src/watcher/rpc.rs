//! JSON-RPC over HTTP log source.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{address_topic, TransferLog, TransferLogSource, TRANSFER_TOPIC};

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct JsonRpcLogSource {
    client: Client,
    url: String,
    contract: String,
    deposit_topic: String,
    next_id: AtomicU64,
}

impl JsonRpcLogSource {
    pub fn new(url: String, contract: &str, deposit_address: &str, timeout: Duration) -> Self {
        Self {
            client: crate::clients::http_client(timeout),
            url,
            contract: contract.to_ascii_lowercase(),
            deposit_topic: address_topic(deposit_address),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> anyhow::Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {}", method, status);
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("{} returned an unparsable body", method))?;

        if let Some(err) = body.error {
            bail!("{} failed [{}]: {}", method, err.code, err.message);
        }
        body.result.ok_or_else(|| anyhow!("{} returned no result", method))
    }
}

pub fn parse_quantity(raw: &str) -> anyhow::Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("quantity {:?} is not 0x-prefixed", raw))?;
    u64::from_str_radix(digits, 16).with_context(|| format!("quantity {:?} is not hex", raw))
}

fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

#[async_trait]
impl TransferLogSource for JsonRpcLogSource {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn head(&self) -> anyhow::Result<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn transfer_logs(&self, from_block: u64, to_block: u64) -> anyhow::Result<Vec<TransferLog>> {
        self.call(
            "eth_getLogs",
            json!([{
                "fromBlock": quantity(from_block),
                "toBlock": quantity(to_block),
                "address": self.contract,
                "topics": [TRANSFER_TOPIC, Value::Null, self.deposit_topic],
            }]),
        )
        .await
    }
}
