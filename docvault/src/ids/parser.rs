//! Loose identifier parsing.

use serde_json::Value;

/// First contiguous run of decimal digits in `raw`, as an integer.
///
/// Returns `None` when there are no digits or the run does not fit in a `u64`.
pub fn parse_digits(raw: &str) -> Option<u64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let run: &str = {
        let rest = &raw[start..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    run.parse().ok()
}

/// Parse an identifier-bearing field value. Null, empty and non-scalar values have no value.
pub fn parse_identifier(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => parse_digits(s),
        Value::Number(n) => match n.as_u64() {
            Some(v) => Some(v),
            None => parse_digits(&n.to_string()),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_digits_first_run() {
        assert_eq!(parse_digits("101660"), Some(101660));
        assert_eq!(parse_digits("T-000123"), Some(123));
        assert_eq!(parse_digits("INV 42 / 7"), Some(42));
        assert_eq!(parse_digits("  9x"), Some(9));
        assert_eq!(parse_digits("no digits"), None);
        assert_eq!(parse_digits(""), None);
    }

    #[test]
    fn test_parse_digits_overflow_is_none() {
        assert_eq!(parse_digits("99999999999999999999999"), None);
    }

    #[test]
    fn test_parse_identifier_values() {
        assert_eq!(parse_identifier(&json!("T-100001")), Some(100001));
        assert_eq!(parse_identifier(&json!(101700)), Some(101700));
        assert_eq!(parse_identifier(&json!(101700.0)), Some(101700));
        assert_eq!(parse_identifier(&json!(-5)), Some(5));
        assert_eq!(parse_identifier(&Value::Null), None);
        assert_eq!(parse_identifier(&json!("")), None);
        assert_eq!(parse_identifier(&json!({"n": 1})), None);
        assert_eq!(parse_identifier(&json!([1])), None);
    }
}
