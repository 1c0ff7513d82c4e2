// src/events.rs
//
// Notifications from the replay engine to the rendering layer.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::replay::PlaybackState;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    StateChanged {
        previous: PlaybackState,
        current: PlaybackState,
    },
    TimeChanged {
        time_ms: i64,
    },
    /// Resident events changed; consumers should re-read the event view.
    EventsUpdated {
        resident_chunks: Vec<usize>,
    },
    /// A blocking load started for the chunk under the cursor.
    LoadingStarted {
        index: usize,
    },
    ChunksEvicted {
        indexes: Vec<usize>,
    },
    /// Timestamps are absolute (ms).
    LiveEventsAppended {
        count: usize,
        first_timestamp_ms: i64,
        last_timestamp_ms: i64,
        last_active_ms: i64,
    },
    NavigateToSession {
        secure_id: String,
    },
    SessionEnded,
}

/// Sending half handed to the engine. A dropped receiver is ignored.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
