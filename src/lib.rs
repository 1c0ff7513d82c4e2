// src/lib.rs
//
// Chunk-streaming playback engine for recorded user sessions.

#[macro_use]
mod logging;

pub mod backend;
pub mod events;
pub mod links;
pub mod model;
pub mod player;
pub mod replay;
pub mod settings;

pub use backend::{ChunkUrlLookup, HttpPayloadFetcher, LiveBatch, PayloadFetcher, SessionBackend};
pub use events::{EventSink, PlayerEvent};
pub use logging::{init_file_logging, stop_file_logging};
pub use model::{Chunk, Event, EventKind, RawEvent, SessionInterval, SessionRecord, SessionResult};
pub use player::Player;
pub use replay::{DesiredState, PlaybackState};
pub use settings::{default_settings_path, load_settings, save_settings, PlayerSettings};
