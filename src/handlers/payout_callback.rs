use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::BridgeStatus;
use crate::error::AppError;
use crate::ports::LedgerError;
use crate::use_cases::{ConfirmError, ConfirmOutcome, PayoutOutcome};
use crate::utils::sanitize::sanitize_json;
use crate::validation::ValidationError;
use crate::AppState;

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayoutCallback {
    pub id: String,
    pub external_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BridgeStatus>,
    pub ignored: bool,
}

fn tokens_match(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len()
        && expected
            .bytes()
            .zip(provided.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub async fn payout_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PayoutCallback>, JsonRejection>,
) -> Result<Json<CallbackAck>, AppError> {
    let provided = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if !tokens_match(&state.callback_token, provided) {
        return Err(AppError::Unauthorized("Invalid callback token".to_string()));
    }

    let Json(callback) = payload.map_err(|rejection| {
        AppError::InvalidPayload(vec![ValidationError::new("body", rejection.body_text())])
    })?;

    if let Ok(raw) = serde_json::to_value(&callback) {
        tracing::debug!(payload = %sanitize_json(&raw), "Payout callback received");
    }

    let transaction_id = Uuid::parse_str(callback.external_id.trim()).map_err(|_| {
        AppError::InvalidPayload(vec![ValidationError::new(
            "external_id",
            "must be a bridge transaction id",
        )])
    })?;

    let Some(outcome) = PayoutOutcome::from_provider_status(&callback.status) else {
        tracing::info!(
            transaction_id = %transaction_id,
            payout_id = %callback.id,
            provider_status = %callback.status,
            "Ignoring non-final payout status"
        );
        return Ok(Json(CallbackAck {
            received: true,
            status: None,
            ignored: true,
        }));
    };

    let confirmed = state
        .confirmations
        .execute(transaction_id, Some(callback.id.as_str()), outcome, "callback")
        .await
        .map_err(|e| match e {
            ConfirmError::Ledger(LedgerError::NotFound(id)) => {
                AppError::NotFound(format!("Transaction {} not found", id))
            }
            ConfirmError::Ledger(other) => AppError::Internal(other.to_string()),
            conflict => {
                tracing::warn!(transaction_id = %transaction_id, error = %conflict, "Payout callback conflicts with ledger");
                AppError::Conflict(conflict.to_string())
            }
        })?;

    let tx = match confirmed {
        ConfirmOutcome::Applied(tx) | ConfirmOutcome::AlreadyApplied(tx) => tx,
    };

    Ok(Json(CallbackAck {
        received: true,
        status: Some(tx.status),
        ignored: false,
    }))
}
