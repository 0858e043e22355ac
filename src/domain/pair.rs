use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An exchange market such as `usdc_idr`: sell `base`, receive `quote`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradingPair {
    base: String,
    quote: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trading pair must look like base_quote, got {0:?}")]
pub struct InvalidPair(pub String);

impl TradingPair {
    pub fn base(&self) -> &str {
        &self.base
    }
}

impl FromStr for TradingPair {
    type Err = InvalidPair;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (base, quote) = lowered
            .split_once('_')
            .ok_or_else(|| InvalidPair(s.to_string()))?;

        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(InvalidPair(s.to_string()));
        }

        Ok(Self {
            base: base.to_string(),
            quote: quote.to_string(),
        })
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}
