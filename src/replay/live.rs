// src/replay/live.rs
//
// Live Append Reconciler - merges streamed events for a session that is still
// recording into chunk 0 and refreshes the bounds the clock checks against.

use super::chunk_store::EventChunkStore;
use super::status::PlaybackStatus;
use crate::backend::LiveBatch;
use crate::model::to_events;

/// Chunk that receives live events.
pub const LIVE_CHUNK_INDEX: usize = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveUpdate {
    pub appended: usize,
    /// Absolute timestamp (ms) of the earliest newly appended event.
    pub first_new_timestamp_ms: i64,
    /// Absolute timestamp (ms) of the latest newly appended event.
    pub last_new_timestamp_ms: i64,
    pub last_active_timestamp_ms: i64,
}

/// Append a live batch. Returns `None` when the batch holds no usable events.
pub fn reconcile(
    store: &mut EventChunkStore,
    status: &mut PlaybackStatus,
    session_start_ms: i64,
    batch: &LiveBatch,
) -> Option<LiveUpdate> {
    let events = to_events(&batch.events);
    let first_new_timestamp_ms = events.first()?.timestamp_ms;
    let last_new_timestamp_ms = events.last()?.timestamp_ms;
    let appended = events.len();

    store.append(LIVE_CHUNK_INDEX, events);
    status.set_last_active_timestamp(batch.last_user_interaction_time_ms);
    status.extend_session_end_time(last_new_timestamp_ms - session_start_ms);

    Some(LiveUpdate {
        appended,
        first_new_timestamp_ms,
        last_new_timestamp_ms,
        last_active_timestamp_ms: status.last_active_timestamp_ms(),
    })
}
