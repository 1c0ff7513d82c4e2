// Shared playback timing constants for the replay engine.
//
// These are the defaults behind the corresponding `PlayerSettings` fields.

/// How far ahead of the cursor (ms) chunks are prefetched during playback.
pub const LOOKAHEAD_MS: i64 = 30_000;

/// Number of chunks holding data above which eviction kicks in.
pub const MAX_CHUNK_COUNT: usize = 8;

/// Nominal render frame period (ms).
pub const FRAME_MS: u64 = 16;

/// Minimum spacing (ms) between processed frame ticks.
pub const THROTTLED_UPDATE_MS: u64 = FRAME_MS * 15;

/// How long (ms) a chunk whose fetch failed is left alone before retrying.
pub const FAILED_CHUNK_RETRY_MS: u64 = 1000;
