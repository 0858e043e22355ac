use serde_json::Value;

/// Masks sensitive fields in JSON payloads before they are logged.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "account_number"
            | "account_holder_name"
            | "password"
            | "secret"
            | "secret_key"
            | "token"
            | "callback_token"
            | "api_key"
            | "authorization"
            | "sign"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let chars: Vec<char> = s.chars().collect();
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            Value::String(format!("{}****{}", head, tail))
        }
        _ => Value::String("****".to_string()),
    }
}
