// src/model.rs
//
// Session data model: recorded events, the chunk manifest, session metadata
// and activity intervals. Also hosts the normaliser that turns raw event
// records (as fetched from chunk payloads) into typed events.

use serde::{Deserialize, Serialize};

/// Raw event record as delivered by the payload store or the live subscription.
pub type RawEvent = serde_json::Value;

/// Recorded event category (the numeric `type` of a raw record).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DomContentLoaded,
    Load,
    FullSnapshot,
    IncrementalSnapshot,
    Meta,
    Custom,
    Plugin,
    Other(u8),
}

impl EventKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => EventKind::DomContentLoaded,
            1 => EventKind::Load,
            2 => EventKind::FullSnapshot,
            3 => EventKind::IncrementalSnapshot,
            4 => EventKind::Meta,
            5 => EventKind::Custom,
            6 => EventKind::Plugin,
            other => EventKind::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            EventKind::DomContentLoaded => 0,
            EventKind::Load => 1,
            EventKind::FullSnapshot => 2,
            EventKind::IncrementalSnapshot => 3,
            EventKind::Meta => 4,
            EventKind::Custom => 5,
            EventKind::Plugin => 6,
            EventKind::Other(code) => *code,
        }
    }
}

/// A single recorded event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Absolute UNIX timestamp in milliseconds.
    pub timestamp_ms: i64,
    pub kind: EventKind,
    /// Opaque event body; its layout belongs to the rendering layer.
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(timestamp_ms: i64, kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            timestamp_ms,
            kind,
            data,
        }
    }
}

/// Chunk manifest entry: a chunk index and the timestamp of its first event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "chunk_index")]
    pub index: usize,
    /// Absolute UNIX timestamp in milliseconds.
    #[serde(rename = "timestamp")]
    pub start_timestamp_ms: i64,
}

impl Chunk {
    pub fn new(index: usize, start_timestamp_ms: i64) -> Self {
        Self {
            index,
            start_timestamp_ms,
        }
    }
}

/// Session record returned by the metadata query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub secure_id: String,
    /// Absolute UNIX timestamp in milliseconds.
    pub start_time_ms: i64,
    pub total_time_ms: i64,
    #[serde(default)]
    pub chunked: bool,
    #[serde(default)]
    pub direct_download_url: Option<String>,
}

impl SessionRecord {
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            start_time_ms: self.start_time_ms,
            total_time_ms: self.total_time_ms,
        }
    }
}

/// Origin and length of the playback timeline. All relative playback times
/// are offsets from `start_time_ms`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub start_time_ms: i64,
    pub total_time_ms: i64,
}

/// Active or inactive span of the session, in relative playback time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInterval {
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub active: bool,
}

/// Entry in the session result list the player was opened from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub secure_id: String,
}

/// Returns the session that follows `secure_id` in the result list, if any.
pub fn find_next_session<'a>(
    results: &'a [SessionResult],
    secure_id: &str,
) -> Option<&'a SessionResult> {
    let position = results.iter().position(|s| s.secure_id == secure_id)?;
    results.get(position + 1)
}

/// Normalise raw event records into typed events, ordered by timestamp.
///
/// Records without a numeric `timestamp` or `type` are dropped. A `data`
/// field stored as a JSON string is decoded in place; if it does not parse,
/// the string is kept as-is.
pub fn to_events(raw: &[RawEvent]) -> Vec<Event> {
    let mut events: Vec<Event> = raw.iter().filter_map(to_event).collect();
    events.sort_by_key(|e| e.timestamp_ms);
    events
}

fn to_event(record: &RawEvent) -> Option<Event> {
    let timestamp_ms = match record.get("timestamp")? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        _ => return None,
    };
    let code = record.get("type")?.as_u64()?;
    let kind = EventKind::from_code(u8::try_from(code).ok()?);
    let data = match record.get("data") {
        Some(serde_json::Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
        }
        Some(value) => value.clone(),
        None => serde_json::Value::Null,
    };
    Some(Event::new(timestamp_ms, kind, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_events_sorts_and_drops_malformed() {
        let raw = vec![
            json!({"type": 3, "timestamp": 2000, "data": {"source": 1}}),
            json!({"type": 2, "timestamp": 1000.7, "data": {}}),
            json!({"timestamp": 1500}),
            json!({"type": 4, "timestamp": "soon"}),
        ];
        let events = to_events(&raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp_ms, 1000);
        assert_eq!(events[0].kind, EventKind::FullSnapshot);
        assert_eq!(events[1].kind, EventKind::IncrementalSnapshot);
    }

    #[test]
    fn test_to_events_decodes_string_data() {
        let raw = vec![json!({"type": 5, "timestamp": 10, "data": "{\"tag\":\"Navigate\"}"})];
        let events = to_events(&raw);
        assert_eq!(events[0].data["tag"], "Navigate");
        assert_eq!(events[0].kind, EventKind::Custom);
    }

    #[test]
    fn test_event_kind_codes() {
        assert_eq!(EventKind::from_code(6), EventKind::Plugin);
        assert_eq!(EventKind::from_code(42), EventKind::Other(42));
        assert_eq!(EventKind::Other(42).code(), 42);
    }

    #[test]
    fn test_chunk_manifest_field_names() {
        let chunk: Chunk = serde_json::from_value(json!({"chunk_index": 3, "timestamp": 99})).unwrap();
        assert_eq!(chunk, Chunk::new(3, 99));
    }

    #[test]
    fn test_find_next_session() {
        let results = vec![
            SessionResult { secure_id: "a".to_string() },
            SessionResult { secure_id: "b".to_string() },
        ];
        assert_eq!(find_next_session(&results, "a").unwrap().secure_id, "b");
        assert!(find_next_session(&results, "b").is_none());
        assert!(find_next_session(&results, "zzz").is_none());
    }
}
