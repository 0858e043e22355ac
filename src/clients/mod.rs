//! HTTP clients for the exchange and the payout provider.

pub mod exchange;
pub mod payout;
pub mod ticker;

pub use exchange::IndodaxTradeClient;
pub use payout::{resolve_channel_code, XenditPayoutClient};
pub use ticker::IndodaxTicker;

use std::time::Duration;

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}
