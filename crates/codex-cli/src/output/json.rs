//! JSON output formatting

use serde::Serialize;

/// Serialize a value as one JSON document
pub fn format<T: Serialize>(value: &T, pretty: bool) -> String {
    let result = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    result.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_and_pretty() {
        let value = serde_json::json!({"cellId": "GEN 1:1"});
        assert_eq!(format(&value, false), r#"{"cellId":"GEN 1:1"}"#);
        assert!(format(&value, true).contains('\n'));
    }
}
