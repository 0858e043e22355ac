use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::TradingPair;
use crate::ports::{RateError, RateOracle};

#[derive(Debug, Deserialize)]
struct TickerEnvelope {
    ticker: Ticker,
}

/// `buy` is the best bid. Other ticker fields are ignored.
#[derive(Debug, Deserialize)]
struct Ticker {
    buy: Option<String>,
}

/// Public ticker endpoint of the exchange, `GET {base_url}/ticker/{pair}`.
#[derive(Clone)]
pub struct IndodaxTicker {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl IndodaxTicker {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client: super::http_client(timeout),
            base_url,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }
}

#[async_trait]
impl RateOracle for IndodaxTicker {
    async fn best_bid(&self, pair: &TradingPair) -> Result<BigDecimal, RateError> {
        let url = format!("{}/ticker/{}", self.base_url.trim_end_matches('/'), pair);
        let client = self.client.clone();
        let pair_name = pair.to_string();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.get(&url).send().await.map_err(|e| {
                    if e.is_timeout() {
                        RateError::Timeout
                    } else {
                        RateError::Unreachable(e.to_string())
                    }
                })?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(RateError::Unreachable(format!("ticker returned {}", status)));
                }
                if !status.is_success() {
                    return Err(RateError::InvalidResponse(format!(
                        "ticker returned {} for {}",
                        status, pair_name
                    )));
                }

                let envelope = response
                    .json::<TickerEnvelope>()
                    .await
                    .map_err(|e| RateError::InvalidResponse(e.to_string()))?;

                Ok(envelope.ticker.buy)
            })
            .await;

        // An empty book is a healthy answer, so it is judged outside the breaker.
        let buy = match result {
            Ok(buy) => buy,
            Err(FailsafeError::Rejected) => return Err(RateError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => return Err(e),
        };
        parse_bid(&pair.to_string(), buy.as_deref())
    }
}

fn parse_bid(pair: &str, raw: Option<&str>) -> Result<BigDecimal, RateError> {
    let raw = raw.ok_or_else(|| RateError::InvalidResponse("ticker has no buy field".into()))?;
    let bid = BigDecimal::from_str(raw.trim())
        .map_err(|_| RateError::InvalidResponse(format!("unparsable bid {:?} for {}", raw, pair)))?;

    if bid <= BigDecimal::from(0) {
        return Err(RateError::NoLiquidity(pair.to_string()));
    }

    Ok(bid)
}
