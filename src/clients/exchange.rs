//! Private trade API of the exchange.
//!
//! Requests are `application/x-www-form-urlencoded`, signed with HMAC-SHA512
//! over the exact encoded body. Parameters are encoded in sorted key order so
//! identical parameters always produce an identical body and signature.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::Sha512;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::domain::{format_atomic, TradingPair};
use crate::ports::{ExchangeClient, ExchangeError};

type HmacSha512 = Hmac<Sha512>;

const AUTH_MARKERS: &[&str] = &[
    "invalid credentials",
    "invalid_credentials",
    "bad sign",
    "invalid key",
    "api key",
    "unauthorized",
    "permission",
];

#[derive(Debug, Deserialize)]
struct TradeResponse {
    success: i64,
    #[serde(rename = "return")]
    result: Option<TradeReturn>,
    error: Option<String>,
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeReturn {
    order_id: Option<serde_json::Value>,
}

pub struct IndodaxTradeClient {
    client: Client,
    private_url: String,
    api_key: String,
    secret_key: String,
    last_nonce: AtomicI64,
}

impl IndodaxTradeClient {
    pub fn new(private_url: String, api_key: String, secret_key: String, timeout: Duration) -> Self {
        Self {
            client: super::http_client(timeout),
            private_url,
            api_key,
            secret_key,
            last_nonce: AtomicI64::new(0),
        }
    }

    /// Strictly increasing millisecond nonce, as the private API requires.
    fn next_nonce(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last_nonce.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Sell parameters keyed by name. The amount is sent under the base asset's
/// code (`usdc` for `usdc_idr`), in whole units with six decimals.
pub fn sell_params(pair: &TradingPair, amount: i64, price: i64, nonce: i64) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("method".to_string(), "trade".to_string()),
        ("nonce".to_string(), nonce.to_string()),
        ("pair".to_string(), pair.to_string()),
        ("price".to_string(), price.to_string()),
        ("type".to_string(), "sell".to_string()),
        (pair.base().to_string(), format_atomic(amount)),
    ])
}

pub fn encode_body(params: &BTreeMap<String, String>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// Hex HMAC-SHA512 of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Authentication(format!("unusable secret key: {}", e)))?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn classify_failure(code: Option<&str>, message: &str) -> ExchangeError {
    let haystack = format!("{} {}", code.unwrap_or_default(), message).to_lowercase();
    if AUTH_MARKERS.iter().any(|marker| haystack.contains(marker)) {
        ExchangeError::Authentication(message.to_string())
    } else {
        ExchangeError::Rejected(message.to_string())
    }
}

fn parse_order_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl ExchangeClient for IndodaxTradeClient {
    async fn sell(
        &self,
        pair: &TradingPair,
        amount: i64,
        price: i64,
    ) -> Result<String, ExchangeError> {
        let body = encode_body(&sell_params(pair, amount, price, self.next_nonce()));
        let signature = sign(&self.secret_key, &body)?;

        let response = self
            .client
            .post(&self.private_url)
            .header("Key", &self.api_key)
            .header("Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExchangeError::Timeout
                } else {
                    ExchangeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ExchangeError::Authentication(format!("exchange returned {}", status)));
        }
        if status.is_server_error() {
            return Err(ExchangeError::Transport(format!("exchange returned {}", status)));
        }

        let trade = response
            .json::<TradeResponse>()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        if trade.success != 1 {
            let message = trade
                .error
                .or(trade.message)
                .unwrap_or_else(|| "unspecified failure".to_string());
            return Err(classify_failure(trade.error_code.as_deref(), &message));
        }

        trade
            .result
            .and_then(|r| r.order_id)
            .as_ref()
            .and_then(parse_order_id)
            .ok_or_else(|| {
                ExchangeError::InvalidResponse("trade succeeded but no order_id returned".into())
            })
    }
}
