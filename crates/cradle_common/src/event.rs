//! Care events: the durable record every ingestion path writes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single care event. `payload` is an open mapping that accumulates
/// analysis and guidance artifacts over the event's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub occurred_at: String,
    pub source: String,
    pub category: String,
    pub payload: Value,
    pub tags: Vec<String>,
    pub created_at: String,
}

impl CareEvent {
    /// The payload as an object, or `None` when it was stored malformed.
    pub fn payload_map(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    /// Mutable payload object, replacing a malformed payload with an empty one.
    pub fn payload_map_mut(&mut self) -> &mut Map<String, Value> {
        if !self.payload.is_object() {
            self.payload = Value::Object(Map::new());
        }
        self.payload.as_object_mut().expect("payload is an object")
    }

    /// Occurrence time, falling back to creation time when unparseable.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        parse_iso(&self.occurred_at).or_else(|| parse_iso(&self.created_at))
    }
}

/// Current UTC time in the RFC3339 form stored on events.
pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC3339 timestamp; naive values are taken as UTC.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Tolerate timestamps written without an offset.
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole minutes elapsed since the given timestamp, negative if in the future.
pub fn minutes_since(value: &str, now: DateTime<Utc>) -> Option<i64> {
    parse_iso(value).map(|when| (now - when).num_seconds() / 60)
}

pub fn new_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

pub fn new_stream_id() -> String {
    format!("str_{}", Uuid::new_v4().simple())
}

pub fn new_audio_id() -> String {
    format!("aud_{}", Uuid::new_v4().simple())
}
