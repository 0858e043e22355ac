use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::clients::resolve_channel_code;
use crate::domain::TradingPair;
use crate::validation::validate_address;

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub public_url: String,
    pub private_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub pair: TradingPair,
}

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub base_url: String,
    pub secret_key: String,
    pub callback_token: String,
}

/// Beneficiary account every payout is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutDestination {
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub deposit_address: String,
    pub contract_address: String,
    /// `None` starts from the chain head at boot.
    pub start_block: Option<u64>,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub ingress_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub http_timeout: Duration,
    pub log_format: LogFormat,
    pub exchange: ExchangeConfig,
    pub payout: PayoutConfig,
    pub destination: PayoutDestination,
    pub watcher: WatcherConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup so tests never touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{} must be set", key));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let exchange = ExchangeConfig {
            public_url: checked_url(
                "INDODAX_PUBLIC_URL",
                or_default("INDODAX_PUBLIC_URL", "https://indodax.com/api"),
            )?,
            private_url: checked_url(
                "INDODAX_PRIVATE_URL",
                or_default("INDODAX_PRIVATE_URL", "https://indodax.com/tapi"),
            )?,
            api_key: required("INDODAX_API_KEY")?,
            secret_key: required("INDODAX_SECRET_KEY")?,
            pair: or_default("TRADING_PAIR", "usdc_idr")
                .parse()
                .context("TRADING_PAIR")?,
        };

        let payout = PayoutConfig {
            base_url: checked_url(
                "XENDIT_BASE_URL",
                or_default("XENDIT_BASE_URL", "https://api.xendit.co"),
            )?,
            secret_key: required("XENDIT_SECRET_KEY")?,
            callback_token: required("PAYOUT_CALLBACK_TOKEN")?,
        };

        let bank_code = required("PAYOUT_BANK_CODE")?.to_ascii_uppercase();
        if resolve_channel_code(&bank_code).is_none() {
            bail!("PAYOUT_BANK_CODE {} has no payout channel", bank_code);
        }
        let destination = PayoutDestination {
            bank_code,
            account_number: required("PAYOUT_ACCOUNT_NUMBER")?,
            account_name: required("PAYOUT_ACCOUNT_NAME")?,
        };

        let watcher = WatcherConfig {
            rpc_url: checked_url("RPC_URL", required("RPC_URL")?)?,
            chain_id: or_default("CHAIN_ID", "11155111")
                .parse()
                .context("CHAIN_ID must be an integer")?,
            deposit_address: validate_address(
                "DEPOSIT_WALLET_ADDRESS",
                &required("DEPOSIT_WALLET_ADDRESS")?,
            )?,
            contract_address: validate_address(
                "STABLECOIN_CONTRACT_ADDRESS",
                &required("STABLECOIN_CONTRACT_ADDRESS")?,
            )?,
            start_block: get("WATCHER_START_BLOCK")
                .map(|v| v.parse())
                .transpose()
                .context("WATCHER_START_BLOCK must be a block number")?,
            confirmations: or_default("WATCHER_CONFIRMATIONS", "2")
                .parse()
                .context("WATCHER_CONFIRMATIONS must be an integer")?,
            poll_interval: Duration::from_secs(
                or_default("WATCHER_POLL_INTERVAL_SECS", "6")
                    .parse()
                    .context("WATCHER_POLL_INTERVAL_SECS must be an integer")?,
            ),
            ingress_url: get("INGRESS_URL")
                .map(|url| checked_url("INGRESS_URL", url))
                .transpose()?,
        };

        let log_format = match or_default("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => bail!("LOG_FORMAT must be pretty or json, got {}", other),
        };

        Ok(Config {
            server_port: or_default("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: required("DATABASE_URL")?,
            http_timeout: Duration::from_secs(
                or_default("HTTP_TIMEOUT_SECS", "15")
                    .parse()
                    .context("HTTP_TIMEOUT_SECS must be an integer")?,
            ),
            log_format,
            exchange,
            payout,
            destination,
            watcher,
        })
    }

    /// Human-readable summary with every secret masked.
    pub fn masked_summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Server Port", self.server_port.to_string()),
            ("Database URL", mask_password(&self.database_url)),
            ("HTTP Timeout", format!("{}s", self.http_timeout.as_secs())),
            ("Exchange Public URL", self.exchange.public_url.clone()),
            ("Exchange Private URL", self.exchange.private_url.clone()),
            ("Exchange API Key", mask_secret(&self.exchange.api_key)),
            ("Exchange Secret Key", mask_secret(&self.exchange.secret_key)),
            ("Trading Pair", self.exchange.pair.to_string()),
            ("Payout Base URL", self.payout.base_url.clone()),
            ("Payout Secret Key", mask_secret(&self.payout.secret_key)),
            ("Payout Callback Token", mask_secret(&self.payout.callback_token)),
            ("Payout Bank Code", self.destination.bank_code.clone()),
            ("Payout Account Number", mask_secret(&self.destination.account_number)),
            ("Payout Account Name", self.destination.account_name.clone()),
            ("RPC URL", mask_password(&self.watcher.rpc_url)),
            ("Chain ID", self.watcher.chain_id.to_string()),
            ("Deposit Address", self.watcher.deposit_address.clone()),
            ("Stablecoin Contract", self.watcher.contract_address.clone()),
            (
                "Watcher Start Block",
                self.watcher
                    .start_block
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "latest".to_string()),
            ),
            ("Watcher Confirmations", self.watcher.confirmations.to_string()),
            (
                "Ingress URL",
                self.watcher.ingress_url.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ]
    }
}

fn checked_url(key: &str, value: String) -> Result<String> {
    url::Url::parse(&value).with_context(|| format!("{} is not a valid URL", key))?;
    Ok(value)
}

fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
