//! Integer settlement arithmetic.
//!
//! All amounts are exact integers: stablecoin in atomic units, fiat in minor
//! units (whole Rupiah). Intermediate products are computed in `i128` and the
//! results must fit the ledger's `i64` columns.

use serde::Serialize;
use thiserror::Error;

/// Decimal places of the bridged stablecoin.
pub const STABLE_DECIMALS: u32 = 6;
/// Atomic units per whole stablecoin.
pub const STABLE_UNIT: i128 = 10i128.pow(STABLE_DECIMALS);
/// Bridge fee, 0.5%.
pub const FEE_BASIS_POINTS: i128 = 50;
pub const BASIS_POINTS_DIVISOR: i128 = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("stable amount must be positive, got {0}")]
    NonPositiveAmount(i64),
    #[error("exchange rate must be positive, got {0}")]
    NonPositiveRate(i64),
    #[error("fiat amount does not fit the ledger range")]
    Overflow,
    #[error("deposit of {0} atomic units converts to zero fiat")]
    DustDeposit(i64),
}

/// Fiat breakdown of one deposit at one captured rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Fiat per whole stablecoin, floored to the exchange's integer price step.
    pub rate: i64,
    pub gross_fiat: i64,
    pub fee: i64,
    pub net_fiat: i64,
}

impl Quote {
    /// `gross = floor(stable * rate / STABLE_UNIT)`, `fee = floor(gross * 50 / 10000)`,
    /// `net = gross - fee`.
    ///
    /// Flooring the fee rounds in the recipient's favour: `net` can be one Rupiah
    /// above `floor(gross * 9950 / 10000)`, e.g. 39,427 against 39,426 for
    /// 2.5 USDC at 15,850.
    pub fn compute(stable_amount: i64, rate: i64) -> Result<Self, FeeError> {
        if stable_amount <= 0 {
            return Err(FeeError::NonPositiveAmount(stable_amount));
        }
        if rate <= 0 {
            return Err(FeeError::NonPositiveRate(rate));
        }

        let gross = i128::from(stable_amount) * i128::from(rate) / STABLE_UNIT;
        let fee = gross * FEE_BASIS_POINTS / BASIS_POINTS_DIVISOR;
        let net = gross - fee;

        if net == 0 {
            return Err(FeeError::DustDeposit(stable_amount));
        }

        Ok(Self {
            rate,
            gross_fiat: i64::try_from(gross).map_err(|_| FeeError::Overflow)?,
            fee: i64::try_from(fee).map_err(|_| FeeError::Overflow)?,
            net_fiat: i64::try_from(net).map_err(|_| FeeError::Overflow)?,
        })
    }
}

/// Renders atomic units as a fixed-point decimal string, e.g. `2500000` -> `"2.500000"`.
pub fn format_atomic(amount: i64) -> String {
    let unit = STABLE_UNIT as i64;
    format!(
        "{}.{:0width$}",
        amount / unit,
        amount % unit,
        width = STABLE_DECIMALS as usize
    )
}
