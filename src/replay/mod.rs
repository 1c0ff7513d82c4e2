// src/replay/mod.rs
//
// Chunk-streaming replay engine.

pub mod chunk_store;
pub mod clock;
pub mod coordinator;
pub mod intervals;
pub mod live;
pub mod loader;
pub mod pacing;
pub mod resolver;
pub mod status;
pub mod target;
pub mod window;

pub use chunk_store::EventChunkStore;
pub use clock::{FrameScheduler, FrameThrottle, PlaybackClock};
pub use coordinator::{PlaybackCoordinator, ReplayState};
pub use loader::{ChunkLoader, LoadedChunk};
pub use resolver::ChunkIndexResolver;
pub use status::{PlaybackState, PlaybackStatus, StateTransition};
pub use target::{DesiredState, Target};
pub use window::{ChunkWindow, WindowManager};
