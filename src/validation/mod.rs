use serde::{Deserialize, Serialize};
use std::fmt;

pub const TX_HASH_HEX_LEN: usize = 64;
pub const ADDRESS_HEX_LEN: usize = 40;
pub const AMOUNT_INPUT_MAX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T = ()> = Result<T, ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

fn validate_prefixed_hex(field: &'static str, value: &str, hex_len: usize) -> ValidationResult<String> {
    let value = sanitize_string(value);
    validate_required(field, &value)?;

    let Some(digits) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) else {
        return Err(ValidationError::new(field, "must start with 0x"));
    };

    if digits.len() != hex_len {
        return Err(ValidationError::new(
            field,
            format!("must be 0x followed by {} hex characters", hex_len),
        ));
    }

    if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(ValidationError::new(field, "must contain only hex characters"));
    }

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

/// Returns the lowercase form of a 32-byte transaction hash.
pub fn validate_tx_hash(tx_hash: &str) -> ValidationResult<String> {
    validate_prefixed_hex("txHash", tx_hash, TX_HASH_HEX_LEN)
}

/// Returns the lowercase form of a 20-byte account address.
pub fn validate_address(field: &'static str, address: &str) -> ValidationResult<String> {
    validate_prefixed_hex(field, address, ADDRESS_HEX_LEN)
}

/// Atomic-unit amount as a plain decimal digit string, positive and within `i64`.
pub fn validate_atomic_amount(amount: &str) -> ValidationResult<i64> {
    let amount = sanitize_string(amount);
    validate_required("amount", &amount)?;

    if amount.len() > AMOUNT_INPUT_MAX_LEN {
        return Err(ValidationError::new(
            "amount",
            format!("must be at most {} characters", AMOUNT_INPUT_MAX_LEN),
        ));
    }

    if !amount.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::new("amount", "must be a decimal digit string"));
    }

    let value = amount
        .parse::<i64>()
        .map_err(|_| ValidationError::new("amount", "exceeds the supported range"))?;

    if value == 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(value)
}

/// Ingress body as posted by the watcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositWebhookPayload {
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub from: String,
    /// Accepts a JSON string or integer; both are validated as digit strings.
    #[serde(default, deserialize_with = "amount_as_string")]
    pub amount: String,
}

fn amount_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "amount must be a string or integer, got {}",
            other
        ))),
    }
}

impl DepositWebhookPayload {
    /// Validates every field and reports all failures at once.
    pub fn validate(&self) -> Result<crate::ports::DepositDetected, Vec<ValidationError>> {
        let tx_hash = validate_tx_hash(&self.tx_hash);
        let from = validate_address("from", &self.from);
        let amount = validate_atomic_amount(&self.amount);

        match (tx_hash, from, amount) {
            (Ok(tx_hash), Ok(from), Ok(amount)) => Ok(crate::ports::DepositDetected {
                tx_hash,
                from,
                amount,
            }),
            (tx_hash, from, amount) => Err([tx_hash.err(), from.err(), amount.err()]
                .into_iter()
                .flatten()
                .collect()),
        }
    }
}
