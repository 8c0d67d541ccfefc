//! Lenient decoding of the upstream station payloads.
//!
//! Both feeds encode numbers either as JSON numbers or as strings, use
//! `null` or blank strings for missing values, and report local timestamps
//! without an offset. This module turns those into typed values; nothing
//! untyped leaves the crate.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use hydrosync_core::{FetchError, RawStationReading};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// One element of a feed's JSON array.
pub(crate) trait FeedRecord: DeserializeOwned {
    /// Convert to a reading. `Err` names the missing required field.
    fn into_reading(self, offset: FixedOffset) -> Result<RawStationReading, String>;
}

/// Decode a feed body into readings, rejecting the whole payload when its
/// shape is wrong.
pub(crate) fn readings<R: FeedRecord>(body: &[u8], offset: FixedOffset) -> Result<Vec<RawStationReading>, FetchError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| FetchError::Malformed(format!("invalid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(FetchError::Malformed(format!("expected a JSON array, got {}", kind(&value))));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let record: R =
                serde_json::from_value(item).map_err(|e| FetchError::Malformed(format!("element {index}: {e}")))?;
            record
                .into_reading(offset)
                .map_err(|field| FetchError::Malformed(format!("element {index}: missing {field}")))
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Number from a JSON number or numeric string. Blank, `null` and
/// unparseable values are absent.
pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number(&s),
        _ => None,
    })
}

/// Trimmed text from a string or number; blank is absent.
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace(',', ".").parse::<f64>().ok().filter(|n| n.is_finite())
}

/// RFC 3339 as-is; naive `YYYY-MM-DD HH:MM[:SS]` at `offset`.
pub(crate) fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(at.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|at| at.with_timezone(&Utc))
}

pub(crate) fn timestamp(raw: Option<&str>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let parsed = raw.and_then(|s| parse_timestamp(s, offset));
    if parsed.is_none()
        && let Some(raw) = raw.filter(|s| !s.trim().is_empty())
    {
        tracing::debug!(value = raw, "unrecognized timestamp ignored");
    }
    parsed
}
