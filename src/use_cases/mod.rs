pub mod confirm_payout;
pub mod process_deposit;

pub use confirm_payout::{ConfirmError, ConfirmOutcome, ConfirmPayout, PayoutOutcome};
pub use process_deposit::{DepositOutcome, ProcessDeposit, SettlementCause, SettlementError, Stage};
