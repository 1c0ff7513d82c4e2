// src/replay/window.rs
//
// Window Manager - decides which chunks must be resident around the cursor
// and which resident chunks can be dropped to bound memory.

use std::collections::{BTreeSet, HashSet};

use super::chunk_store::EventChunkStore;
use super::resolver::ChunkIndexResolver;

/// Chunk index range `[start, end]` covering a playback window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkWindow {
    pub start: usize,
    pub end: usize,
}

impl ChunkWindow {
    pub fn indexes(&self) -> impl Iterator<Item = usize> {
        self.start..=self.end
    }
}

pub struct WindowManager<'a> {
    resolver: &'a ChunkIndexResolver,
    /// Absolute session start (ms); relative playback times are offsets from it.
    session_start_ms: i64,
}

impl<'a> WindowManager<'a> {
    pub fn new(resolver: &'a ChunkIndexResolver, session_start_ms: i64) -> Self {
        Self {
            resolver,
            session_start_ms,
        }
    }

    /// Chunk index covering a relative playback time.
    pub fn index_at(&self, time_ms: i64) -> usize {
        self.resolver.resolve_index(self.session_start_ms + time_ms)
    }

    /// Index range for `[start_ms, end_ms]`, optionally extended by one chunk
    /// and clamped to the manifest's last index.
    pub fn window(&self, start_ms: i64, end_ms: Option<i64>, force_load_next: bool) -> ChunkWindow {
        let start = self.index_at(start_ms);
        let mut end = match end_ms {
            Some(end_ms) => self.index_at(end_ms),
            None => start,
        };
        if force_load_next {
            end += 1;
        }
        if let Some(last) = self.resolver.last_index() {
            end = end.min(last);
        }
        ChunkWindow {
            start,
            end: end.max(start),
        }
    }

    /// Indexes in the window that are neither resident nor in flight.
    pub fn needed_indexes(
        &self,
        store: &EventChunkStore,
        loading: &HashSet<usize>,
        start_ms: i64,
        end_ms: Option<i64>,
        force_load_next: bool,
    ) -> BTreeSet<usize> {
        self.window(start_ms, end_ms, force_load_next)
            .indexes()
            .filter(|idx| !store.contains(*idx) && !loading.contains(idx))
            .collect()
    }

    /// Resident chunks that may be evicted once more than `max_resident`
    /// chunks hold data: everything before `start_idx`, and anything at least
    /// `max_resident` chunks ahead whose start lies beyond the lookahead
    /// horizon. `cursor_idx` is never returned.
    pub fn evictable(
        &self,
        store: &EventChunkStore,
        start_idx: usize,
        cursor_idx: usize,
        max_resident: usize,
        lookahead_ms: i64,
    ) -> BTreeSet<usize> {
        let mut to_remove = BTreeSet::new();
        let with_data = store.indexes_with_data();
        if with_data.len() <= max_resident {
            return to_remove;
        }

        let start_ts = self.resolver.start_timestamp_of(start_idx);
        for idx in with_data {
            if idx == cursor_idx {
                continue;
            }
            let beyond_horizon = match (self.resolver.start_timestamp_of(idx), start_ts) {
                (Some(chunk_ts), Some(start_ts)) => {
                    idx >= start_idx + max_resident && chunk_ts > start_ts + lookahead_ms
                }
                _ => false,
            };
            if idx < start_idx || beyond_horizon {
                to_remove.insert(idx);
            }
        }
        to_remove
    }
}
