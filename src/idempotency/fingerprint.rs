use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hashes any serializable payload. See [`hash_value`].
pub fn hash_request<T: Serialize>(data: &T) -> Result<String> {
    let value = serde_json::to_value(data)?;
    Ok(hash_value(&value))
}

/// Returns the hex SHA-256 of the canonical JSON form of `value`.
///
/// Object keys are sorted at every depth before hashing, so two payloads that
/// differ only in field order produce the same fingerprint.
pub fn hash_value(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, nested)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
