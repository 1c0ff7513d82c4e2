// src/replay/loader.rs
//
// Chunk Loader - fetches one chunk's events for a session.
// Concurrent requests for the same (session, chunk) share a single fetch:
// the first caller starts it, later callers join the same shared future.
// An entry stays in the in-flight set until the coordinator has merged its
// result and calls `release`, so nobody refetches a chunk that has arrived
// but not yet been stored. A chunk whose fetch failed is not refetched until
// FAILED_CHUNK_RETRY_MS has passed.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::pacing::FAILED_CHUNK_RETRY_MS;

use crate::backend::{ChunkUrlLookup, PayloadFetcher};
use crate::model::{to_events, Event};

/// Result of a chunk load. A failed load carries no index and no events.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedChunk {
    pub index: Option<usize>,
    pub events: Vec<Event>,
}

impl LoadedChunk {
    pub fn failed() -> Self {
        Self {
            index: None,
            events: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.index.is_none()
    }
}

/// Handle to an in-flight (or finished) chunk load. Cheap to clone; every
/// clone resolves to the same result.
pub type ChunkLoad = Shared<BoxFuture<'static, LoadedChunk>>;

type ChunkKey = (String, usize);

#[derive(Clone)]
pub struct ChunkLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    urls: Arc<dyn ChunkUrlLookup>,
    payloads: Arc<dyn PayloadFetcher>,
    in_flight: Mutex<HashMap<ChunkKey, ChunkLoad>>,
    url_cache: Mutex<HashMap<ChunkKey, String>>,
    /// When each chunk last failed to load.
    failures: Mutex<HashMap<ChunkKey, Instant>>,
}

impl ChunkLoader {
    pub fn new(urls: Arc<dyn ChunkUrlLookup>, payloads: Arc<dyn PayloadFetcher>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                urls,
                payloads,
                in_flight: Mutex::new(HashMap::new()),
                url_cache: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start loading a chunk, or join the load already in flight for it.
    pub fn load(&self, secure_id: &str, index: usize) -> ChunkLoad {
        let key = (secure_id.to_string(), index);
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = in_flight.get(&key) {
            return existing.clone();
        }
        if self.inner.failed_recently(&key) {
            return futures::future::ready(LoadedChunk::failed()).boxed().shared();
        }

        let inner = self.inner.clone();
        let session = key.0.clone();
        let load = async move {
            match inner.fetch_chunk(&session, index).await {
                Ok(events) => {
                    inner.forget_failure(&session, index);
                    tlog!(
                        "[ChunkLoader:{}] Loaded chunk {} ({} events)",
                        session,
                        index,
                        events.len()
                    );
                    LoadedChunk {
                        index: Some(index),
                        events,
                    }
                }
                Err(e) => {
                    tlog!("[ChunkLoader:{}] Failed to load chunk {}: {}", session, index, e);
                    inner
                        .failures
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert((session.clone(), index), Instant::now());
                    LoadedChunk::failed()
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(key, load.clone());
        load
    }

    /// Indexes currently in flight for a session.
    pub fn loading_indexes(&self, secure_id: &str) -> HashSet<usize> {
        let in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight
            .keys()
            .filter(|(session, _)| session == secure_id)
            .map(|(_, idx)| *idx)
            .collect()
    }

    /// Forget a load once its result has been consumed. A newer load for the
    /// same chunk stays registered.
    pub fn release(&self, secure_id: &str, index: usize, load: &ChunkLoad) {
        let key = (secure_id.to_string(), index);
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(&key).is_some_and(|current| current.ptr_eq(load)) {
            in_flight.remove(&key);
        }
    }

    /// Drop all in-flight and failure bookkeeping. Futures already handed
    /// out still run to completion for whoever holds them.
    pub fn clear(&self) {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.clear();
        drop(in_flight);
        self.inner
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn in_flight_count(&self) -> usize {
        let in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.len()
    }

    /// Cached chunk URL lookup. Rejects an empty session identifier.
    pub async fn chunk_url(&self, secure_id: &str, index: usize) -> Result<String, String> {
        self.inner.chunk_url(secure_id, index).await
    }
}

impl LoaderInner {
    fn failed_recently(&self, key: &ChunkKey) -> bool {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures
            .get(key)
            .is_some_and(|at| at.elapsed() < Duration::from_millis(FAILED_CHUNK_RETRY_MS))
    }

    fn forget_failure(&self, secure_id: &str, index: usize) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(&(secure_id.to_string(), index));
    }

    async fn chunk_url(&self, secure_id: &str, index: usize) -> Result<String, String> {
        if secure_id.is_empty() {
            return Err("Session ID is empty".to_string());
        }

        let key = (secure_id.to_string(), index);
        let cached = {
            let cache = self.url_cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.get(&key).cloned()
        };
        if let Some(url) = cached {
            return Ok(url);
        }

        let url = self.urls.event_chunk_url(secure_id, index).await?;
        if url.is_empty() {
            return Err(format!("No URL for chunk {}", index));
        }
        self.url_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, url.clone());
        Ok(url)
    }

    async fn fetch_chunk(&self, secure_id: &str, index: usize) -> Result<Vec<Event>, String> {
        let url = self.chunk_url(secure_id, index).await?;
        let raw = self.payloads.fetch_payload(&url).await?;
        Ok(to_events(&raw))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::model::RawEvent;

    /// In-memory chunk backend: chunk `i` lives at `mem://<session>/<i>` and
    /// holds the given raw events. Counts URL lookups and payload fetches.
    #[derive(Default)]
    pub(crate) struct MemoryChunks {
        pub chunks: Mutex<HashMap<usize, Vec<RawEvent>>>,
        pub failing: Mutex<HashSet<usize>>,
        pub url_lookups: AtomicUsize,
        pub fetches: AtomicUsize,
        pub delay_ms: u64,
    }

    impl MemoryChunks {
        pub fn with_chunks(chunks: Vec<(usize, Vec<i64>)>) -> Self {
            let map = chunks
                .into_iter()
                .map(|(idx, stamps)| {
                    let raw = stamps
                        .into_iter()
                        .map(|ts| json!({"type": 3, "timestamp": ts, "data": {}}))
                        .collect();
                    (idx, raw)
                })
                .collect();
            Self {
                chunks: Mutex::new(map),
                ..Default::default()
            }
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChunkUrlLookup for MemoryChunks {
        async fn event_chunk_url(&self, secure_id: &str, index: usize) -> Result<String, String> {
            self.url_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(format!("mem://{}/{}", secure_id, index))
        }
    }

    #[async_trait]
    impl PayloadFetcher for MemoryChunks {
        async fn fetch_payload(&self, url: &str) -> Result<Vec<RawEvent>, String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let index: usize = url
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| format!("bad url {}", url))?;
            if self.failing.lock().unwrap().contains(&index) {
                return Err(format!("chunk {} unavailable", index));
            }
            self.chunks
                .lock()
                .unwrap()
                .get(&index)
                .cloned()
                .ok_or_else(|| format!("chunk {} not found", index))
        }
    }

    fn loader_for(backend: Arc<MemoryChunks>) -> ChunkLoader {
        ChunkLoader::new(backend.clone(), backend)
    }

    #[tokio::test]
    async fn test_load_returns_events() {
        let backend = Arc::new(MemoryChunks::with_chunks(vec![(0, vec![5, 1])]));
        let loader = loader_for(backend.clone());

        let loaded = loader.load("abc", 0).await;
        assert_eq!(loaded.index, Some(0));
        let ts: Vec<i64> = loaded.events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(ts, vec![1, 5]);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let backend = Arc::new(MemoryChunks {
            delay_ms: 10,
            ..MemoryChunks::with_chunks(vec![(1, vec![1000])])
        });
        let loader = loader_for(backend.clone());

        let first = loader.load("abc", 1);
        let second = loader.load("abc", 1);
        assert!(loader.loading_indexes("abc").contains(&1));
        let (a, b) = futures::join!(first.clone(), second);

        assert_eq!(a, b);
        assert_eq!(backend.fetch_count(), 1);

        loader.release("abc", 1, &first);
        assert!(!loader.loading_indexes("abc").contains(&1));
        assert_eq!(loader.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_resolves_to_empty_result() {
        let backend = Arc::new(MemoryChunks::with_chunks(vec![(0, vec![1])]));
        backend.failing.lock().unwrap().insert(0);
        let loader = loader_for(backend);

        let loaded = loader.load("abc", 0).await;
        assert!(loaded.is_failed());
        assert!(loaded.events.is_empty());
    }

    #[tokio::test]
    async fn test_release_keeps_newer_load_registered() {
        let backend = Arc::new(MemoryChunks::with_chunks(vec![(2, vec![2000])]));
        let loader = loader_for(backend.clone());

        let old = loader.load("abc", 2);
        loader.clear();
        let newer = loader.load("abc", 2);
        assert!(!old.ptr_eq(&newer));

        // Releasing the stale handle leaves the newer load joinable.
        loader.release("abc", 2, &old);
        assert_eq!(loader.in_flight_count(), 1);
        let joined = loader.load("abc", 2);
        assert!(joined.ptr_eq(&newer));

        loader.release("abc", 2, &newer);
        assert_eq!(loader.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_backs_off_before_retry() {
        let backend = Arc::new(MemoryChunks::with_chunks(vec![(1, vec![1000])]));
        backend.failing.lock().unwrap().insert(1);
        let loader = loader_for(backend.clone());

        let first = loader.load("abc", 1);
        assert!(first.clone().await.is_failed());
        loader.release("abc", 1, &first);
        assert_eq!(backend.fetch_count(), 1);

        // Inside the retry window: failed at once, no fetch.
        backend.failing.lock().unwrap().clear();
        assert!(loader.load("abc", 1).await.is_failed());
        assert_eq!(backend.fetch_count(), 1);
        assert_eq!(loader.in_flight_count(), 0);

        tokio::time::advance(Duration::from_millis(FAILED_CHUNK_RETRY_MS)).await;
        let retry = loader.load("abc", 1);
        assert_eq!(retry.clone().await.index, Some(1));
        loader.release("abc", 1, &retry);
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_url_lookup_is_cached_and_rejects_empty_session() {
        let backend = Arc::new(MemoryChunks::with_chunks(vec![(0, vec![1])]));
        let loader = loader_for(backend.clone());

        assert_eq!(loader.chunk_url("abc", 0).await.unwrap(), "mem://abc/0");
        assert_eq!(loader.chunk_url("abc", 0).await.unwrap(), "mem://abc/0");
        assert_eq!(backend.url_lookups.load(Ordering::SeqCst), 1);

        assert!(loader.chunk_url("", 0).await.is_err());
        assert!(loader.load("", 0).await.is_failed());
    }

    #[tokio::test]
    async fn test_loading_indexes_are_scoped_by_session() {
        let backend = Arc::new(MemoryChunks::with_chunks(vec![(0, vec![1]), (1, vec![2])]));
        let loader = loader_for(backend);

        let _a = loader.load("one", 0);
        let _b = loader.load("one", 1);
        let _c = loader.load("two", 0);
        assert_eq!(loader.loading_indexes("one"), HashSet::from([0, 1]));
        assert_eq!(loader.loading_indexes("two"), HashSet::from([0]));

        loader.clear();
        assert_eq!(loader.in_flight_count(), 0);
    }
}
