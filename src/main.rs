use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nusantara_bridge::cli::{self, Cli, Commands, DbCommands, TxCommands};
use nusantara_bridge::config::{Config, LogFormat};
use nusantara_bridge::ports::{DepositSink, LedgerStore};
use nusantara_bridge::watcher::WebhookSink;
use nusantara_bridge::{create_app, shutdown, startup};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve { no_watcher: false }) {
        Commands::Serve { no_watcher } => serve(config, no_watcher).await,
        Commands::Watch => watch(config).await,
        Commands::Tx(command) => {
            let ledger: Arc<dyn LedgerStore> = Arc::new(startup::connect_ledger(&config).await?);
            match command {
                TxCommands::Show { tx_hash } => cli::handle_tx_show(ledger.as_ref(), &tx_hash).await,
                TxCommands::List { status, limit } => {
                    cli::handle_tx_list(ledger.as_ref(), &status, limit).await
                }
                TxCommands::ForceComplete { tx_id } => cli::handle_tx_force_complete(ledger, tx_id).await,
            }
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config, no_watcher: bool) -> anyhow::Result<()> {
    let ledger = startup::connect_ledger(&config).await?;
    ledger.migrate().await.context("running migrations")?;
    tracing::info!("Database migrations completed");

    let ledger: Arc<dyn LedgerStore> = Arc::new(ledger);
    let (state, settlement) = startup::build_state(&config, ledger);
    let shutdown_rx = shutdown::spawn_signal_listener();

    let watcher_task = if no_watcher {
        tracing::info!("In-process deposit watcher disabled");
        None
    } else {
        let sink: Arc<dyn DepositSink> = settlement;
        let watcher = startup::build_watcher(&config, sink);
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { watcher.run(rx).await }))
    };

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown::wait(shutdown_rx))
        .await?;

    if let Some(task) = watcher_task {
        task.await.context("watcher task panicked")??;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn watch(config: Config) -> anyhow::Result<()> {
    let ingress_url = config
        .watcher
        .ingress_url
        .clone()
        .context("INGRESS_URL must be set for the standalone watcher")?;

    let sink: Arc<dyn DepositSink> = Arc::new(WebhookSink::new(ingress_url, config.http_timeout * 4));
    let watcher = startup::build_watcher(&config, sink);
    watcher.run(shutdown::spawn_signal_listener()).await
}
