use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

/// Scale used for all monetary Decimal64 columns. A raw wire value of
/// 1_000_000_000_000 equals 1.0 USD.
pub const MONEY_SCALE: u32 = 12;

/// Generate a new lexicographically-sortable 128-bit id (crockford base32).
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Validate a 32-character lowercase hex OTLP trace id.
pub fn validate_trace_id(trace_id: &str) -> CoreResult<()> {
    if trace_id.len() != 32 || !trace_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(format!(
            "trace_id must be a 32-character hex string, got {trace_id:?}"
        )));
    }
    Ok(())
}

/// Validate a 16-character lowercase hex OTLP span id.
pub fn validate_span_id(span_id: &str) -> CoreResult<()> {
    if span_id.len() != 16 || !span_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(format!(
            "span_id must be a 16-character hex string, got {span_id:?}"
        )));
    }
    Ok(())
}

/// Compose the dedup key for a span: `<trace_id>:<span_id>`, lowercased.
pub fn dedup_id(trace_id: &str, span_id: &str) -> CoreResult<String> {
    validate_trace_id(trace_id)?;
    validate_span_id(span_id)?;
    Ok(format!(
        "{}:{}",
        trace_id.to_ascii_lowercase(),
        span_id.to_ascii_lowercase()
    ))
}

/// Split a dedup id back into `(trace_id, span_id)`.
pub fn split_dedup_id(id: &str) -> CoreResult<(&str, &str)> {
    match id.split_once(':') {
        Some((trace_id, span_id)) if trace_id.len() == 32 && span_id.len() == 16 => {
            Ok((trace_id, span_id))
        }
        _ => Err(CoreError::Validation(format!("malformed dedup id {id:?}"))),
    }
}

/// ClickHouse Bool columns travel as a single byte.
pub fn bool_to_byte(b: bool) -> u8 {
    u8::from(b)
}

pub fn byte_to_bool(b: u8) -> bool {
    b != 0
}

/// Convert a `Decimal` into the raw scaled i64 stored in a Decimal64(12)
/// column. Values are rescaled; overflow surfaces as a validation error
/// (a cost exceeding ~9.2e6 USD at scale 12 does not fit).
pub fn money_to_raw(value: Decimal) -> CoreResult<i64> {
    let mut v = value;
    v.rescale(MONEY_SCALE);
    i64::try_from(v.mantissa())
        .map_err(|_| CoreError::Validation(format!("monetary value {value} out of range")))
}

/// Convert a raw Decimal64(12) wire value back into a `Decimal`.
pub fn money_from_raw(raw: i64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(raw), MONEY_SCALE)
}

/// Encode an attribute map as its canonical JSON object string.
pub fn attrs_to_json(attrs: &HashMap<String, String>) -> String {
    serde_json::to_string(attrs).unwrap_or_else(|_| "{}".to_string())
}

/// Decode an attribute map from a JSON object string. Non-string values are
/// stringified; a malformed document is a corrupt-row error.
pub fn attrs_from_json(json: &str) -> CoreResult<HashMap<String, String>> {
    if json.is_empty() {
        return Ok(HashMap::new());
    }
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| CoreError::Corrupt(format!("attribute map: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::Corrupt("attribute map is not an object".to_string()))?;
    Ok(obj
        .iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_id_sortable() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert_eq!(a.len(), 26);
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn test_validate_trace_id() {
        assert!(validate_trace_id(&"a".repeat(32)).is_ok());
        assert!(validate_trace_id("AAAA").is_err());
        assert!(validate_trace_id(&"g".repeat(32)).is_err());
    }

    #[test]
    fn test_validate_span_id() {
        assert!(validate_span_id("0123456789abcdef").is_ok());
        assert!(validate_span_id("0123456789ABCDEF").is_ok());
        assert!(validate_span_id("0123").is_err());
    }

    #[test]
    fn test_dedup_id_round_trip() {
        let trace = "aa".repeat(16);
        let id = dedup_id(&trace, "0123456789ABCDEF").unwrap();
        assert_eq!(id, format!("{trace}:0123456789abcdef"));
        let (t, s) = split_dedup_id(&id).unwrap();
        assert_eq!(t, trace);
        assert_eq!(s, "0123456789abcdef");
    }

    #[test]
    fn test_split_dedup_id_malformed() {
        assert!(split_dedup_id("nope").is_err());
        assert!(split_dedup_id("aaaa:bbbb").is_err());
    }

    #[test]
    fn test_bool_byte() {
        assert_eq!(bool_to_byte(true), 1);
        assert_eq!(bool_to_byte(false), 0);
        assert!(byte_to_bool(1));
        assert!(!byte_to_bool(0));
    }

    #[test]
    fn test_money_round_trip() {
        let cost = dec!(0.0025);
        let raw = money_to_raw(cost).unwrap();
        assert_eq!(raw, 2_500_000_000);
        assert_eq!(money_from_raw(raw), dec!(0.002500000000));
    }

    #[test]
    fn test_money_zero() {
        assert_eq!(money_to_raw(Decimal::ZERO).unwrap(), 0);
        assert_eq!(money_from_raw(0), Decimal::ZERO);
    }

    #[test]
    fn test_attrs_json_round_trip() {
        let mut attrs = HashMap::new();
        attrs.insert("service.name".to_string(), "gateway".to_string());
        attrs.insert("gen_ai.request.model".to_string(), "gpt-4o-mini".to_string());
        let json = attrs_to_json(&attrs);
        assert_eq!(attrs_from_json(&json).unwrap(), attrs);
    }

    #[test]
    fn test_attrs_from_json_coerces_scalars() {
        let attrs = attrs_from_json(r#"{"retries": 3, "ok": true}"#).unwrap();
        assert_eq!(attrs["retries"], "3");
        assert_eq!(attrs["ok"], "true");
    }

    #[test]
    fn test_attrs_from_json_rejects_non_object() {
        assert!(attrs_from_json("[1,2]").is_err());
    }

    #[test]
    fn test_attrs_from_json_empty() {
        assert!(attrs_from_json("").unwrap().is_empty());
    }
}
