// src/replay/status.rs
//
// Playback state machine:
//   Empty -> Loading -> Paused <-> Playing -> SessionEnded
// Any state re-enters Loading on reset (session change) or on a blocking
// chunk load. Mutators return the transition (if the state changed) so the
// caller can notify listeners.

use serde::{Deserialize, Serialize};

use super::target::DesiredState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Empty,
    Loading,
    Paused,
    Playing,
    SessionEnded,
}

impl From<DesiredState> for PlaybackState {
    fn from(state: DesiredState) -> Self {
        match state {
            DesiredState::Playing => PlaybackState::Playing,
            DesiredState::Paused => PlaybackState::Paused,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub previous: PlaybackState,
    pub current: PlaybackState,
}

#[derive(Clone, Debug)]
pub struct PlaybackStatus {
    state: PlaybackState,
    /// Current relative playback time (ms).
    time_ms: i64,
    /// Relative time (ms) at which playback ends.
    session_end_time_ms: i64,
    /// Absolute timestamp (ms) of the latest user interaction (live sessions).
    last_active_timestamp_ms: i64,
    is_live: bool,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Loading,
            time_ms: 0,
            session_end_time_ms: 0,
            last_active_timestamp_ms: 0,
            is_live: false,
        }
    }
}

impl PlaybackStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    pub fn session_end_time_ms(&self) -> i64 {
        self.session_end_time_ms
    }

    pub fn last_active_timestamp_ms(&self) -> i64 {
        self.last_active_timestamp_ms
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    fn transition(&mut self, next: PlaybackState) -> Option<StateTransition> {
        if self.state == next {
            return None;
        }
        let previous = self.state;
        self.state = next;
        Some(StateTransition {
            previous,
            current: next,
        })
    }

    /// A blocking load started for the chunk under the cursor.
    pub fn begin_loading(&mut self) -> Option<StateTransition> {
        self.transition(PlaybackState::Loading)
    }

    /// Chunks for `time_ms` are available; move to the requested state.
    pub fn apply_chunks_loaded(&mut self, time_ms: i64, action: DesiredState) -> Option<StateTransition> {
        self.time_ms = time_ms;
        let next = if action == DesiredState::Playing && self.has_reached_end(time_ms) {
            PlaybackState::SessionEnded
        } else {
            action.into()
        };
        self.transition(next)
    }

    pub fn set_time(&mut self, time_ms: i64) {
        self.time_ms = time_ms;
    }

    /// Pause at the current time without loading anything.
    pub fn pause_in_place(&mut self) -> Option<StateTransition> {
        match self.state {
            PlaybackState::Empty | PlaybackState::Paused => None,
            _ => self.transition(PlaybackState::Paused),
        }
    }

    /// Frame tick: move the cursor; playing past the end ends the session.
    pub fn advance_to(&mut self, time_ms: i64) -> Option<StateTransition> {
        if self.state == PlaybackState::Playing && self.has_reached_end(time_ms) {
            self.time_ms = self.session_end_time_ms;
            return self.transition(PlaybackState::SessionEnded);
        }
        self.time_ms = time_ms;
        None
    }

    fn has_reached_end(&self, time_ms: i64) -> bool {
        !self.is_live && self.session_end_time_ms > 0 && time_ms >= self.session_end_time_ms
    }

    pub fn set_session_end_time(&mut self, end_ms: i64) {
        self.session_end_time_ms = end_ms.max(0);
    }

    /// Grow the session end to cover newly appended data. Never shrinks.
    pub fn extend_session_end_time(&mut self, end_ms: i64) {
        self.session_end_time_ms = self.session_end_time_ms.max(end_ms);
    }

    pub fn set_last_active_timestamp(&mut self, timestamp_ms: i64) {
        self.last_active_timestamp_ms = self.last_active_timestamp_ms.max(timestamp_ms);
    }

    pub fn set_live(&mut self, is_live: bool) {
        self.is_live = is_live;
    }

    /// Session metadata is unavailable; nothing can be played.
    pub fn mark_empty(&mut self) -> Option<StateTransition> {
        self.transition(PlaybackState::Empty)
    }

    /// Session identifier changed: forget everything and start loading.
    pub fn reset(&mut self) -> Option<StateTransition> {
        self.time_ms = 0;
        self.session_end_time_ms = 0;
        self.last_active_timestamp_ms = 0;
        self.is_live = false;
        self.transition(PlaybackState::Loading)
    }

    /// Fraction of the session played, if the total length is known.
    pub fn progress(&self, total_time_ms: i64) -> Option<f64> {
        if total_time_ms <= 0 {
            return None;
        }
        Some(self.time_ms as f64 / total_time_ms as f64)
    }
}
