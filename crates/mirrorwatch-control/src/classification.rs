//! Decoding of decision-engine output into classification snapshots.
//!
//! Decision records are loosely structured: list fields may arrive either as
//! JSON arrays or as JSON-encoded strings, and nested records may themselves
//! be JSON-encoded. Every field that is absent or malformed falls back to its
//! default instead of failing.

use mirrorwatch_store::{ClassificationSnapshot, Endpoint, Timestamp};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Key in the identity record naming the entry to look up in the ML record.
pub const LOOKUP_KEY: &str = "endpoint_hash";

/// Build the identity record for an endpoint.
#[must_use]
pub fn identity_record(endpoint: &Endpoint) -> Value {
    json!({
        LOOKUP_KEY: endpoint.hash.to_hex(),
        "name": endpoint.name,
        "mac": endpoint.data.mac,
    })
}

/// Decode `value`, accepting either the value itself or a string containing its JSON encoding.
fn tolerant<T: DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    match value? {
        Value::String(s) => serde_json::from_str(s).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}

fn tolerant_object(value: Option<&Value>) -> Option<serde_json::Map<String, Value>> {
    tolerant::<Value>(value).and_then(|v| match v {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

fn string_field(record: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn behavior_of(record: &serde_json::Map<String, Value>) -> Option<String> {
    let decisions = tolerant_object(record.get("decisions"))?;
    string_field(&decisions, "behavior")
}

/// Merge an identity record and an ML record into one snapshot.
///
/// The identity record supplies [`LOOKUP_KEY`]; that key selects a nested
/// record in `ml_record` carrying `pcap_labels` and `decisions.behavior`.
/// `labels` and `confidences` come from the top of `ml_record`. When the
/// nested record is missing, the same fields are read from the top level.
#[must_use]
pub fn parse_classification(identity_record: &Value, ml_record: &Value) -> ClassificationSnapshot {
    let mut snapshot = ClassificationSnapshot::default();

    let Some(ml) = tolerant_object(Some(ml_record)) else {
        return snapshot;
    };

    snapshot.labels = tolerant(ml.get("labels")).unwrap_or_default();
    snapshot.confidences = tolerant(ml.get("confidences")).unwrap_or_default();
    snapshot.os = string_field(&ml, "os");

    let nested = identity_record
        .get(LOOKUP_KEY)
        .and_then(Value::as_str)
        .and_then(|key| tolerant_object(ml.get(key)));

    let detail = nested.as_ref().unwrap_or(&ml);
    snapshot.pcap_labels = string_field(detail, "pcap_labels");
    if let Some(behavior) = behavior_of(detail).or_else(|| behavior_of(&ml)) {
        snapshot.behavior = behavior;
    }

    snapshot
}

/// Observation time of a decision record, falling back to `now`.
#[must_use]
pub fn record_timestamp(ml_record: &Value, now: Timestamp) -> Timestamp {
    match ml_record.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as Timestamp))
            .unwrap_or(now),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_or(now, |f| f as Timestamp),
        _ => now,
    }
}
