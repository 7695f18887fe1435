use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::warn;

/// Loose truthiness used by the required-validator and date coercion.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Parses RFC 3339 timestamps, plain `YYYY-MM-DD` dates (UTC midnight) and
/// unix epoch milliseconds.
pub fn parse_date(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(text) => OffsetDateTime::parse(text, &Rfc3339).ok().or_else(|| {
            Date::parse(text, format_description!("[year]-[month]-[day]"))
                .ok()
                .map(|date| date.midnight().assume_utc())
        }),
        Value::Number(number) => {
            let millis = match number.as_i64() {
                Some(ms) => i128::from(ms),
                None => {
                    let ms = number.as_f64()?.trunc();
                    if !ms.is_finite() || ms.abs() > i64::MAX as f64 {
                        return None;
                    }
                    ms as i128
                }
            };
            OffsetDateTime::from_unix_timestamp_nanos(millis.checked_mul(1_000_000)?).ok()
        }
        _ => None,
    }
}

/// Canonical stored form of a date-typed scalar: an RFC 3339 UTC string.
///
/// Falsy input is kept as is; unparseable input becomes null.
pub fn coerce_date(value: Value) -> Value {
    if !is_truthy(&value) {
        return value;
    }
    match parse_date(&value).and_then(|date| date.to_offset(UtcOffset::UTC).format(&Rfc3339).ok()) {
        Some(text) => Value::String(text),
        None => {
            warn!(raw = %value, "unparseable date value replaced with null");
            Value::Null
        }
    }
}
