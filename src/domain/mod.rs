//! Framework-agnostic bridge domain: the ledger record, its state machine and
//! the settlement arithmetic.

pub mod bridge_transaction;
pub mod fees;
pub mod pair;

pub use bridge_transaction::{
    BridgeStatus, BridgeTransaction, StatusChange, TransitionError, UnknownStatus,
};
pub use fees::{format_atomic, FeeError, Quote, FEE_BASIS_POINTS, STABLE_DECIMALS, STABLE_UNIT};
pub use pair::TradingPair;
