use serde_json::Value;

/// Parses a string as JSON, falling back to the raw string when it is not
/// valid JSON. Evidence values (storage entries, beacon query parameters,
/// websocket payload parts) are captured best-effort and must never abort
/// collection over a malformed payload.
pub fn safe_parse(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_valid_json() {
        assert_eq!(safe_parse("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(safe_parse("[1,2]"), json!([1, 2]));
        assert_eq!(safe_parse("42"), json!(42));
    }

    #[test]
    fn falls_back_to_raw_string() {
        assert_eq!(safe_parse("not-json"), json!("not-json"));
        assert_eq!(safe_parse("{broken"), json!("{broken"));
    }
}
