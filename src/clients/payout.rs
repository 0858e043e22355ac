//! Payouts v2 API of the disbursement provider.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ports::{PayoutClient, PayoutError, PayoutReceipt, PayoutRequest};
use crate::utils::sanitize::sanitize_json;

pub const PAYOUT_CURRENCY: &str = "IDR";

/// Internal bank / e-wallet code to provider channel code.
const CHANNEL_CODES: &[(&str, &str)] = &[
    // State-owned banks
    ("BCA", "ID_BCA"),
    ("MANDIRI", "ID_MANDIRI"),
    ("BRI", "ID_BRI"),
    ("BNI", "ID_BNI"),
    ("BTN", "ID_BTN"),
    ("BSI", "ID_BSI"),
    // Private and commercial banks
    ("CIMB", "ID_CIMB"),
    ("PERMATA", "ID_PERMATA"),
    ("DANAMON", "ID_DANAMON"),
    ("DBS", "ID_DBS"),
    ("MAYBANK", "ID_MAYBANK"),
    ("MEGA", "ID_MEGA"),
    ("OCBC", "ID_OCBC"),
    ("PANIN", "ID_PANIN"),
    ("SINARMAS", "ID_SINARMAS"),
    ("UOB", "ID_UOB"),
    ("BUKOPIN", "ID_BUKOPIN"),
    // Digital banks
    ("BTPN", "ID_BTPN"),
    ("JAGO", "ID_JAGO"),
    ("NEO", "ID_NEO"),
    ("SEABANK", "ID_SEABANK"),
    ("ALADIN", "ID_ALADIN"),
    // Syariah units
    ("BCA_SYARIAH", "ID_BCA_SYR"),
    ("CIMB_SYARIAH", "ID_CIMB_SYR"),
    // E-wallets
    ("GOPAY", "ID_GOPAY"),
    ("OVO", "ID_OVO"),
    ("DANA", "ID_DANA"),
    ("SHOPEEPAY", "ID_SHOPEEPAY"),
    ("LINKAJA", "ID_LINKAJA"),
    ("SAKUKU", "ID_SAKUKU"),
];

/// Resolves an internal code case-insensitively. There is no default channel.
pub fn resolve_channel_code(bank_code: &str) -> Option<&'static str> {
    let normalized = bank_code.trim().to_ascii_uppercase();
    CHANNEL_CODES
        .iter()
        .find(|(code, _)| *code == normalized)
        .map(|(_, channel)| *channel)
}

#[derive(Debug, Serialize)]
struct CreatePayoutBody<'a> {
    external_id: &'a str,
    amount: i64,
    currency: &'static str,
    channel_code: &'static str,
    channel_properties: ChannelProperties<'a>,
    description: String,
}

#[derive(Debug, Serialize)]
struct ChannelProperties<'a> {
    account_holder_name: &'a str,
    account_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    id: String,
    external_id: String,
    amount: serde_json::Number,
    channel_code: String,
    status: String,
}

#[derive(Clone)]
pub struct XenditPayoutClient {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl XenditPayoutClient {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> Self {
        Self {
            client: super::http_client(timeout),
            base_url,
            secret_key,
        }
    }
}

#[async_trait]
impl PayoutClient for XenditPayoutClient {
    async fn payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, PayoutError> {
        let channel_code = resolve_channel_code(&request.bank_code)
            .ok_or_else(|| PayoutError::UnknownChannel(request.bank_code.clone()))?;
        if request.amount_minor <= 0 {
            return Err(PayoutError::AmountOutOfRange(request.amount_minor));
        }

        let body = CreatePayoutBody {
            external_id: &request.idempotency_key,
            amount: request.amount_minor,
            currency: PAYOUT_CURRENCY,
            channel_code,
            channel_properties: ChannelProperties {
                account_holder_name: &request.account_name,
                account_number: &request.account_number,
            },
            description: format!("Nusantara Bridge Payout {}", request.idempotency_key),
        };

        tracing::debug!(
            transaction_id = %request.idempotency_key,
            body = %sanitize_json(&serde_json::to_value(&body).unwrap_or_default()),
            "Submitting payout"
        );

        let url = format!("{}/v2/payouts", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .basic_auth(&self.secret_key, Some(""))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PayoutError::Timeout
                } else {
                    PayoutError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PayoutError::Authentication(text),
                s if s.is_server_error() => {
                    PayoutError::Transport(format!("provider returned {}: {}", s, text))
                }
                s => PayoutError::Rejected {
                    status: s.as_u16(),
                    body: text,
                },
            });
        }

        let payout = response
            .json::<PayoutResponse>()
            .await
            .map_err(|e| PayoutError::InvalidResponse(e.to_string()))?;

        let amount = payout
            .amount
            .as_i64()
            .ok_or_else(|| PayoutError::InvalidResponse(format!("amount {}", payout.amount)))?;
        if amount != request.amount_minor {
            return Err(PayoutError::InvalidResponse(format!(
                "amount mismatch: sent {}, got {}",
                request.amount_minor, amount
            )));
        }

        if payout.external_id != request.idempotency_key {
            return Err(PayoutError::InvalidResponse(format!(
                "external_id mismatch: sent {}, got {}",
                request.idempotency_key, payout.external_id
            )));
        }

        Ok(PayoutReceipt {
            id: payout.id,
            external_id: payout.external_id,
            amount,
            channel_code: payout.channel_code,
            status: payout.status,
        })
    }
}
