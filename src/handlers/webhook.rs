use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{BridgeStatus, BridgeTransaction, StatusChange};
use crate::error::AppError;
use crate::use_cases::DepositOutcome;
use crate::validation::{validate_tx_hash, DepositWebhookPayload, ValidationError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DepositAck {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BridgeStatus>,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub transaction: BridgeTransaction,
    pub history: Vec<StatusChange>,
}

/// Deposit ingress. Acknowledges only once the payout has been initiated.
pub async fn deposit_webhook(
    State(state): State<AppState>,
    payload: Result<Json<DepositWebhookPayload>, JsonRejection>,
) -> Result<Json<DepositAck>, AppError> {
    let Json(payload) = payload.map_err(|rejection| {
        AppError::InvalidPayload(vec![ValidationError::new("body", rejection.body_text())])
    })?;
    let deposit = payload.validate().map_err(AppError::InvalidPayload)?;

    tracing::info!(tx_hash = %deposit.tx_hash, amount = deposit.amount, "Deposit webhook received");

    let outcome = state.settlement.execute(deposit).await.map_err(|e| {
        tracing::error!(
            stage = %e.stage,
            transaction_id = ?e.transaction_id,
            error = %e,
            "Settlement failed"
        );
        AppError::Internal(e.to_string())
    })?;

    Ok(Json(match outcome {
        DepositOutcome::AlreadyProcessed => DepositAck {
            success: true,
            message: "Deposit already processed",
            transaction_id: None,
            status: None,
        },
        DepositOutcome::PayoutInitiated(tx) => DepositAck {
            success: true,
            message: "Deposit settled, payout initiated",
            transaction_id: Some(tx.id),
            status: Some(tx.status),
        },
    }))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<TransactionView>, AppError> {
    let tx_hash = validate_tx_hash(&tx_hash).map_err(|e| AppError::InvalidPayload(vec![e]))?;

    let transaction = state
        .ledger
        .find_by_deposit_hash(&tx_hash)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", tx_hash)))?;
    let history = state.ledger.history(transaction.id).await?;

    Ok(Json(TransactionView {
        transaction,
        history,
    }))
}
