// src/replay/chunk_store.rs
//
// Event Chunk Store - loaded event lists keyed by chunk index.
// A key with a non-empty list is resident; a missing key is neither loaded
// nor loading (the loader tracks in-flight fetches separately).

use std::collections::BTreeMap;

use crate::model::Event;

#[derive(Debug, Default, Clone)]
pub struct EventChunkStore {
    chunks: BTreeMap<usize, Vec<Event>>,
}

impl EventChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, events: Vec<Event>) {
        self.chunks.insert(index, events);
    }

    pub fn remove(&mut self, index: usize) -> Option<Vec<Event>> {
        self.chunks.remove(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.chunks.contains_key(&index)
    }

    pub fn get(&self, index: usize) -> Option<&[Event]> {
        self.chunks.get(&index).map(|v| v.as_slice())
    }

    /// Drop every chunk (session change).
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Indexes whose event list is non-empty, ascending.
    pub fn indexes_with_data(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(idx, _)| *idx)
            .collect()
    }

    /// Append events to a chunk, keeping the merged list ordered by timestamp.
    /// Events with equal timestamps keep their arrival order.
    pub fn append(&mut self, index: usize, events: Vec<Event>) {
        let chunk = self.chunks.entry(index).or_default();
        let in_order = match (chunk.last(), events.first()) {
            (Some(last), Some(first)) => last.timestamp_ms <= first.timestamp_ms,
            _ => true,
        };
        chunk.extend(events);
        if !in_order {
            chunk.sort_by_key(|e| e.timestamp_ms);
        }
    }

    /// Flattened, time-ordered view of all resident events.
    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.chunks.values().flatten().cloned().collect();
        events.sort_by_key(|e| e.timestamp_ms);
        events
    }

    /// Total number of resident events.
    pub fn event_count(&self) -> usize {
        self.chunks.values().map(|v| v.len()).sum()
    }

    /// Timestamp of the latest event in the highest-indexed chunk holding data.
    pub fn last_loaded_event_timestamp(&self) -> Option<i64> {
        self.chunks
            .values()
            .rev()
            .find(|events| !events.is_empty())
            .and_then(|events| events.iter().map(|e| e.timestamp_ms).max())
    }

    /// Timestamp of the earliest resident event.
    pub fn first_event_timestamp(&self) -> Option<i64> {
        self.chunks
            .values()
            .flatten()
            .map(|e| e.timestamp_ms)
            .min()
    }
}
