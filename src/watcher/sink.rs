use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::ports::{DepositDetected, DepositSink};

/// Forwards deposits to a remote ingress endpoint.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: crate::clients::http_client(timeout),
            url,
        }
    }
}

#[async_trait]
impl DepositSink for WebhookSink {
    async fn deliver(&self, deposit: DepositDetected) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "txHash": deposit.tx_hash,
                "from": deposit.from,
                "amount": deposit.amount.to_string(),
            }))
            .send()
            .await
            .with_context(|| format!("posting deposit {} to ingress", deposit.tx_hash))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("ingress returned {} for {}: {}", status, deposit.tx_hash, body);
        }

        tracing::info!(tx_hash = %deposit.tx_hash, "Deposit forwarded to ingress");
        Ok(())
    }
}
