use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{format_atomic, BridgeStatus, BridgeTransaction};
use crate::ports::LedgerStore;
use crate::use_cases::{ConfirmOutcome, ConfirmPayout, PayoutOutcome};
use crate::validation::validate_tx_hash;

#[derive(Parser)]
#[command(name = "nusantara-bridge")]
#[command(about = "Stablecoin deposit to Rupiah payout settlement service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the in-process deposit watcher (default)
    Serve {
        /// Serve HTTP only; deposits arrive through the webhook
        #[arg(long)]
        no_watcher: bool,
    },

    /// Run the deposit watcher alone, forwarding deposits to INGRESS_URL
    Watch,

    /// Transaction inspection and operator commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Show a transaction and its transition log by deposit hash
    Show {
        #[arg(value_name = "TX_HASH")]
        tx_hash: String,
    },

    /// List transactions in a status, oldest first
    List {
        #[arg(short, long, default_value = "failed")]
        status: String,

        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },

    /// Mark a PAYOUT_INITIATED transaction COMPLETED
    ForceComplete {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

fn print_transaction(tx: &BridgeTransaction) {
    println!("Transaction {}", tx.id);
    println!("  Deposit Hash:   {}", tx.deposit_tx_hash);
    println!("  From:           {}", tx.client_wallet_address);
    println!("  Stable Amount:  {} ({} atomic)", format_atomic(tx.stable_amount), tx.stable_amount);
    println!("  Exchange Rate:  {}", tx.exchange_rate);
    println!("  Fiat Amount:    {}", tx.fiat_amount);
    println!("  Order ID:       {}", tx.exchange_order_id.as_deref().unwrap_or("-"));
    println!("  Payout ID:      {}", tx.payout_id.as_deref().unwrap_or("-"));
    println!("  Status:         {}", tx.status);
    println!("  Created:        {}", tx.created_at.to_rfc3339());
    println!("  Updated:        {}", tx.updated_at.to_rfc3339());
}

pub async fn handle_tx_show(ledger: &dyn LedgerStore, tx_hash: &str) -> anyhow::Result<()> {
    let tx_hash = validate_tx_hash(tx_hash)?;
    let Some(tx) = ledger.find_by_deposit_hash(&tx_hash).await? else {
        bail!("No transaction for deposit {}", tx_hash);
    };

    print_transaction(&tx);
    println!("  History:");
    for change in ledger.history(tx.id).await? {
        println!(
            "    {}  {:<18} -> {:<18} [{}]",
            change.created_at.to_rfc3339(),
            change.from_status.map(|s| s.as_str()).unwrap_or("-"),
            change.to_status,
            change.step
        );
    }
    Ok(())
}

pub async fn handle_tx_list(ledger: &dyn LedgerStore, status: &str, limit: i64) -> anyhow::Result<()> {
    let status: BridgeStatus = status.parse()?;
    let records = ledger.list_by_status(status, limit).await?;

    if records.is_empty() {
        println!("No transactions in {}", status);
        return Ok(());
    }

    println!(
        "{:<36} {:<66} {:>14} {:>12} {:<20}",
        "ID", "Deposit Hash", "Stable", "Fiat", "Updated"
    );
    println!("{}", "-".repeat(152));
    for tx in records {
        println!(
            "{:<36} {:<66} {:>14} {:>12} {:<20}",
            tx.id,
            tx.deposit_tx_hash,
            format_atomic(tx.stable_amount),
            tx.fiat_amount,
            tx.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn handle_tx_force_complete(ledger: Arc<dyn LedgerStore>, tx_id: Uuid) -> anyhow::Result<()> {
    let outcome = ConfirmPayout::new(ledger)
        .execute(tx_id, None, PayoutOutcome::Succeeded, "force_complete")
        .await
        .with_context(|| format!("force-completing transaction {}", tx_id))?;

    match outcome {
        ConfirmOutcome::Applied(_) => {
            tracing::info!(transaction_id = %tx_id, "Transaction force-completed by operator");
            println!("✓ Transaction {} marked as completed", tx_id);
        }
        ConfirmOutcome::AlreadyApplied(_) => {
            println!("Transaction {} was already completed", tx_id);
        }
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let ledger = crate::startup::connect_ledger(config).await?;

    tracing::info!("Running database migrations...");
    ledger.migrate().await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    for (name, value) in config.masked_summary() {
        println!("  {:<24} {}", format!("{}:", name), value);
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}
