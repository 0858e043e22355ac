//! Seams to every external collaborator of the settlement pipeline.

pub mod deposit;
pub mod exchange;
pub mod ledger;
pub mod payout;
pub mod rates;

pub use deposit::{DepositDetected, DepositSink};
pub use exchange::{ExchangeClient, ExchangeError};
pub use ledger::{LedgerError, LedgerResult, LedgerStore};
pub use payout::{PayoutClient, PayoutError, PayoutReceipt, PayoutRequest};
pub use rates::{RateError, RateOracle};
