//! Postgres implementation of LedgerStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as SqlxTransaction};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{BridgeStatus, BridgeTransaction, StatusChange};
use crate::ports::{LedgerError, LedgerResult, LedgerStore};

const COLUMNS: &str = "id, deposit_tx_hash, client_wallet_address, stable_amount, exchange_rate, \
     fiat_amount, exchange_order_id, payout_id, status, created_at, updated_at";

pub async fn create_pool(database_url: &str, acquire_timeout: Duration) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Postgres-backed bridge ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn log_change(
        executor: &mut SqlxTransaction<'_, Postgres>,
        transaction_id: Uuid,
        from: Option<BridgeStatus>,
        to: BridgeStatus,
        step: &str,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bridge_status_changes (transaction_id, from_status, to_status, step)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(transaction_id)
        .bind(from.map(|s| s.as_str()))
        .bind(to.as_str())
        .bind(step)
        .execute(&mut **executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn create(&self, tx: &BridgeTransaction) -> LedgerResult<BridgeTransaction> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            r#"
            INSERT INTO bridge_transactions ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (deposit_tx_hash) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(&tx.deposit_tx_hash)
        .bind(&tx.client_wallet_address)
        .bind(tx.stable_amount)
        .bind(tx.exchange_rate)
        .bind(tx.fiat_amount)
        .bind(&tx.exchange_order_id)
        .bind(&tx.payout_id)
        .bind(tx.status.as_str())
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Err(LedgerError::DuplicateDeposit(tx.deposit_tx_hash.clone()));
        };

        Self::log_change(&mut db_tx, row.id, None, tx.status, "quote").await?;
        db_tx.commit().await?;

        row.into_domain()
    }

    async fn find_by_deposit_hash(
        &self,
        deposit_tx_hash: &str,
    ) -> LedgerResult<Option<BridgeTransaction>> {
        let row = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            "SELECT {COLUMNS} FROM bridge_transactions WHERE deposit_tx_hash = $1"
        ))
        .bind(deposit_tx_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BridgeTransactionRow::into_domain).transpose()
    }

    async fn get(&self, id: Uuid) -> LedgerResult<BridgeTransaction> {
        let row = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            "SELECT {COLUMNS} FROM bridge_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| LedgerError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn transition(
        &self,
        next: &BridgeTransaction,
        from: BridgeStatus,
        step: &str,
    ) -> LedgerResult<BridgeTransaction> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            r#"
            UPDATE bridge_transactions SET
                client_wallet_address = $3,
                stable_amount = $4,
                exchange_rate = $5,
                fiat_amount = $6,
                exchange_order_id = $7,
                payout_id = $8,
                status = $9,
                updated_at = $10
            WHERE id = $1 AND status = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(next.id)
        .bind(from.as_str())
        .bind(&next.client_wallet_address)
        .bind(next.stable_amount)
        .bind(next.exchange_rate)
        .bind(next.fiat_amount)
        .bind(&next.exchange_order_id)
        .bind(&next.payout_id)
        .bind(next.status.as_str())
        .bind(next.updated_at)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Err(LedgerError::StaleStatus {
                id: next.id,
                expected: from,
            });
        };

        Self::log_change(&mut db_tx, next.id, Some(from), next.status, step).await?;
        db_tx.commit().await?;

        row.into_domain()
    }

    async fn history(&self, id: Uuid) -> LedgerResult<Vec<StatusChange>> {
        let rows = sqlx::query_as::<_, StatusChangeRow>(
            r#"
            SELECT transaction_id, from_status, to_status, step, created_at
            FROM bridge_status_changes
            WHERE transaction_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StatusChangeRow::into_domain).collect()
    }

    async fn list_by_status(
        &self,
        status: BridgeStatus,
        limit: i64,
    ) -> LedgerResult<Vec<BridgeTransaction>> {
        let rows = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            "SELECT {COLUMNS} FROM bridge_transactions WHERE status = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BridgeTransactionRow::into_domain).collect()
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct BridgeTransactionRow {
    id: Uuid,
    deposit_tx_hash: String,
    client_wallet_address: String,
    stable_amount: i64,
    exchange_rate: i64,
    fiat_amount: i64,
    exchange_order_id: Option<String>,
    payout_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BridgeTransactionRow {
    fn into_domain(self) -> LedgerResult<BridgeTransaction> {
        let status = parse_status(&self.status)?;
        Ok(BridgeTransaction {
            id: self.id,
            deposit_tx_hash: self.deposit_tx_hash,
            client_wallet_address: self.client_wallet_address,
            stable_amount: self.stable_amount,
            exchange_rate: self.exchange_rate,
            fiat_amount: self.fiat_amount,
            exchange_order_id: self.exchange_order_id,
            payout_id: self.payout_id,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusChangeRow {
    transaction_id: Uuid,
    from_status: Option<String>,
    to_status: String,
    step: String,
    created_at: DateTime<Utc>,
}

impl StatusChangeRow {
    fn into_domain(self) -> LedgerResult<StatusChange> {
        Ok(StatusChange {
            transaction_id: self.transaction_id,
            from_status: self.from_status.as_deref().map(parse_status).transpose()?,
            to_status: parse_status(&self.to_status)?,
            step: self.step,
            created_at: self.created_at,
        })
    }
}

fn parse_status(raw: &str) -> LedgerResult<BridgeStatus> {
    raw.parse::<BridgeStatus>()
        .map_err(|e| LedgerError::Corrupt(e.to_string()))
}
