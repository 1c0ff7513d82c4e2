// src/replay/resolver.rs
//
// Chunk Index Resolver - maps absolute timestamps to the chunk that covers them.

use crate::model::Chunk;

/// Manifest-backed lookup between timestamps and chunk indexes.
/// Manifests are small (a few hundred chunks at most) so lookups are linear.
#[derive(Debug, Default, Clone)]
pub struct ChunkIndexResolver {
    chunks: Vec<Chunk>,
}

impl ChunkIndexResolver {
    pub fn new(mut chunks: Vec<Chunk>) -> Self {
        chunks.sort_by_key(|c| c.index);
        Self { chunks }
    }

    /// Greatest chunk index whose start timestamp is `<= timestamp_ms`, or 0.
    pub fn resolve_index(&self, timestamp_ms: i64) -> usize {
        let mut idx = 0;
        for chunk in &self.chunks {
            if chunk.start_timestamp_ms <= timestamp_ms {
                idx = chunk.index;
            }
        }
        idx
    }

    pub fn start_timestamp_of(&self, index: usize) -> Option<i64> {
        self.chunks
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.start_timestamp_ms)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.chunks.last().map(|c| c.index)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ChunkIndexResolver {
        ChunkIndexResolver::new(vec![
            Chunk::new(0, 0),
            Chunk::new(1, 1000),
            Chunk::new(2, 2000),
        ])
    }

    #[test]
    fn test_resolve_inside_chunk() {
        assert_eq!(manifest().resolve_index(1500), 1);
    }

    #[test]
    fn test_resolve_on_boundary_and_past_end() {
        let resolver = manifest();
        assert_eq!(resolver.resolve_index(1000), 1);
        assert_eq!(resolver.resolve_index(999), 0);
        assert_eq!(resolver.resolve_index(50_000), 2);
    }

    #[test]
    fn test_resolve_before_first_chunk_is_zero() {
        let resolver = ChunkIndexResolver::new(vec![Chunk::new(0, 500), Chunk::new(1, 900)]);
        assert_eq!(resolver.resolve_index(100), 0);
        assert_eq!(ChunkIndexResolver::default().resolve_index(100), 0);
    }

    #[test]
    fn test_start_timestamp_and_last_index() {
        let resolver = manifest();
        assert_eq!(resolver.start_timestamp_of(2), Some(2000));
        assert_eq!(resolver.start_timestamp_of(7), None);
        assert_eq!(resolver.last_index(), Some(2));
        assert_eq!(resolver.len(), 3);
        assert_eq!(ChunkIndexResolver::default().last_index(), None);
    }
}
