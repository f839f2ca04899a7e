//! Send-timestamp recovery from raw push payloads.
//!
//! Senders embed their wall clock under one of several historical field
//! names. The value is epoch milliseconds, sometimes delivered as a JSON
//! string by older scanner firmware.

use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Field names that may carry the sender's send time, in priority order.
pub const SEND_TIME_FIELDS: [&str; 4] = ["_sentAt", "sentAt", "sent_at", "ts"];

/// Recover the sender's send time from a raw payload.
///
/// Returns `None` when no known field holds a usable epoch-millisecond
/// value. Values outside the representable range are treated as absent.
pub fn extract_send_time(payload: &Map<String, Value>) -> Option<OffsetDateTime> {
    SEND_TIME_FIELDS
        .iter()
        .find_map(|name| payload.get(*name))
        .and_then(as_epoch_millis)
        .and_then(from_epoch_millis)
}

/// Convert epoch milliseconds to an [`OffsetDateTime`], if representable.
pub fn from_epoch_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

fn as_epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
