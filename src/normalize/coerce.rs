//! Best-effort field coercion for upstream payloads.
//!
//! The ticketing API is not consistent about scalar types: ids arrive as
//! numbers or strings depending on the endpoint, and prices occasionally as
//! quoted decimals. Each coercion is an ordered list of named strategies
//! tried in sequence; when none applies the error names every strategy that
//! was attempted so the offending payload is diagnosable from the log line.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

type Strategy<T> = (&'static str, fn(&Value) -> Option<T>);

fn apply<T>(field: &str, value: &Value, strategies: &[Strategy<T>]) -> Result<T> {
    for (_, f) in strategies {
        if let Some(out) = f(value) {
            return Ok(out);
        }
    }
    let names: Vec<&str> = strategies.iter().map(|(n, _)| *n).collect();
    Err(anyhow!(
        "field {field}: value {value} matched none of the strategies {names:?}"
    ))
}

pub fn coerce_i64(field: &str, value: &Value) -> Result<i64> {
    apply(
        field,
        value,
        &[
            ("integer", |v| v.as_i64()),
            ("integral-float", |v| {
                v.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            }),
            ("string-integer", |v| {
                v.as_str().and_then(|s| s.trim().parse::<i64>().ok())
            }),
        ],
    )
}

pub fn coerce_f64(field: &str, value: &Value) -> Result<f64> {
    apply(
        field,
        value,
        &[
            ("float", |v| v.as_f64()),
            ("string-float", |v| {
                v.as_str().and_then(|s| s.trim().parse::<f64>().ok())
            }),
        ],
    )
}

pub fn coerce_string(field: &str, value: &Value) -> Result<String> {
    apply(
        field,
        value,
        &[
            ("string", |v| v.as_str().map(|s| s.to_string())),
            ("number-as-string", |v| {
                v.as_i64()
                    .map(|n| n.to_string())
                    .or_else(|| v.as_f64().map(|f| f.to_string()))
            }),
        ],
    )
}

pub fn coerce_bool(field: &str, value: &Value) -> Result<bool> {
    apply(
        field,
        value,
        &[
            ("bool", |v| v.as_bool()),
            ("string-bool", |v| {
                v.as_str().and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    _ => None,
                })
            }),
            ("zero-one", |v| v.as_i64().and_then(|n| match n {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            })),
        ],
    )
}

/// Upstream timestamps come as RFC 3339 with offset, RFC 3339 Zulu, or a bare
/// `YYYY-MM-DDTHH:MM:SS`, which is taken as UTC.
pub fn coerce_timestamp(field: &str, value: &Value) -> Result<DateTime<Utc>> {
    apply(
        field,
        value,
        &[
            ("rfc3339", |v| {
                v.as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            }),
            ("naive-utc", |v| {
                v.as_str()
                    .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
                    .map(|dt| dt.and_utc())
            }),
        ],
    )
}

/// Missing, null, or coercible; anything else is an error.
pub fn coerce_opt_f64(field: &str, value: Option<&Value>) -> Result<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => coerce_f64(field, v).map(Some),
    }
}

pub fn coerce_opt_i64(field: &str, value: Option<&Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => coerce_i64(field, v).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_arrive_as_numbers_or_strings() {
        assert_eq!(coerce_i64("SeatId", &json!(42)).unwrap(), 42);
        assert_eq!(coerce_i64("SeatId", &json!("42")).unwrap(), 42);
        assert_eq!(coerce_i64("SeatId", &json!(42.0)).unwrap(), 42);
        assert!(coerce_i64("SeatId", &json!(42.5)).is_err());
    }

    #[test]
    fn failure_names_all_attempted_strategies() {
        let err = coerce_i64("ZoneId", &json!({"nested": true})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("integer"));
        assert!(msg.contains("string-integer"));
        assert!(msg.contains("ZoneId"));
    }

    #[test]
    fn timestamps_parse_with_and_without_offset() {
        let a = coerce_timestamp("date", &json!("2026-03-01T19:30:00+00:00")).unwrap();
        let b = coerce_timestamp("date", &json!("2026-03-01T19:30:00Z")).unwrap();
        let c = coerce_timestamp("date", &json!("2026-03-01T19:30:00")).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn null_prices_stay_null() {
        assert_eq!(coerce_opt_f64("Price", Some(&json!(null))).unwrap(), None);
        assert_eq!(coerce_opt_f64("Price", None).unwrap(), None);
        assert_eq!(
            coerce_opt_f64("Price", Some(&json!("12.5"))).unwrap(),
            Some(12.5)
        );
    }
}
