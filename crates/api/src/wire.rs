//! Response envelopes.
//!
//! The service answers either with the bare entity/array or wrapped as
//! `{ "data": ... }` (lists sometimes as `items`/`results`). Entity shapes are
//! normalized by the resource types themselves.

#![forbid(unsafe_code)]

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{ApiError, ApiResult};

const LIST_KEYS: [&str; 3] = ["data", "items", "results"];

/// Strip a `{ "data": ... }` wrapper if present.
pub fn unwrap_envelope(v: Value) -> Value {
    match v {
        Value::Object(mut m) if m.contains_key("data") => m.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

fn malformed(e: serde_json::Error) -> ApiError {
    ApiError::Network(format!("malformed response: {}", e))
}

pub fn decode<T: DeserializeOwned>(v: Value) -> ApiResult<T> {
    serde_json::from_value(unwrap_envelope(v)).map_err(malformed)
}

pub fn decode_list<T: DeserializeOwned>(v: Value) -> ApiResult<Vec<T>> {
    let arr = match v {
        Value::Array(_) => v,
        Value::Object(mut m) => LIST_KEYS
            .iter()
            .find_map(|k| m.remove(*k).filter(Value::is_array))
            .ok_or_else(|| ApiError::Network("malformed response: expected a list".into()))?,
        Value::Null => Value::Array(Vec::new()),
        _ => return Err(ApiError::Network("malformed response: expected a list".into())),
    };
    serde_json::from_value(arr).map_err(malformed)
}

/// Human message from an error body (`message`, `error` or `detail`), else the raw text.
pub fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(Value::Object(m)) = serde_json::from_str::<Value>(trimmed) {
        for key in ["message", "error", "detail"] {
            if let Some(Value::String(s)) = m.get(key) {
                return Some(s.clone());
            }
        }
    }
    Some(trimmed.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vitrine_core::resource::Advertisement;

    #[test]
    fn decode_accepts_wrapped_and_bare() {
        let bare: Advertisement = decode(json!({ "id": 1, "titre": "t" })).unwrap();
        let wrapped: Advertisement = decode(json!({ "data": { "id": 1, "titre": "t" } })).unwrap();
        assert_eq!(bare, wrapped);
    }

    #[test]
    fn decode_list_shapes() {
        let a: Vec<Advertisement> = decode_list(json!([{ "id": 1 }])).unwrap();
        let b: Vec<Advertisement> = decode_list(json!({ "items": [{ "id": 1 }], "total": 1 })).unwrap();
        let c: Vec<Advertisement> = decode_list(Value::Null).unwrap();
        assert_eq!(a, b);
        assert!(c.is_empty());
        assert!(decode_list::<Advertisement>(json!({ "count": 0 })).is_err());
    }

    #[test]
    fn error_message_prefers_json_fields() {
        assert_eq!(error_message(r#"{"message":"titre requis"}"#).as_deref(), Some("titre requis"));
        assert_eq!(error_message(r#"{"detail":"gone"}"#).as_deref(), Some("gone"));
        assert_eq!(error_message("Bad Gateway").as_deref(), Some("Bad Gateway"));
        assert!(error_message("  ").is_none());
    }
}
