// src/replay/intervals.rs
//
// Inactivity lookup over the session's activity intervals.

use crate::model::SessionInterval;

/// End of the inactive interval containing `time_ms`, if any.
/// Returns `None` when `time_ms` lies in an active interval or outside all intervals.
pub fn inactivity_end(intervals: &[SessionInterval], time_ms: i64) -> Option<i64> {
    intervals
        .iter()
        .find(|i| time_ms >= i.start_time_ms && time_ms < i.end_time_ms)
        .filter(|i| !i.active)
        .map(|i| i.end_time_ms)
}
