//! Secret masking for log lines and audit payloads

use serde_json::Value;

/// Key fragments that mark a JSON field as sensitive
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "pass",
    "secret",
    "key",
    "token",
    "auth",
    "credential",
    "private",
    "priv",
    "community",
];

/// Masks a secret keeping only its first two and last character.
/// Values of three characters or fewer are masked completely.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 3 {
        return "***".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail = chars[chars.len() - 1];
    format!("{head}***{tail}")
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Returns a copy of `value` with every sensitive object field masked,
/// recursing into nested objects.
pub fn mask_json_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let masked = if is_sensitive_key(k) {
                        match v {
                            Value::String(s) if !s.is_empty() => Value::String(mask_secret(s)),
                            _ => Value::String("***".to_string()),
                        }
                    } else if v.is_object() {
                        mask_json_secrets(v)
                    } else {
                        v.clone()
                    };
                    (k.clone(), masked)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
