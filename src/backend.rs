// src/backend.rs
//
// Contracts for the collaborators the replay engine consumes: the session
// metadata/manifest queries, the chunk URL lookup, the raw payload store and
// the live subscription. Transport lives behind these traits; the only
// concrete piece here is the HTTP payload fetcher.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::model::{Chunk, RawEvent, SessionInterval, SessionRecord};

/// Resolves a short-lived download URL for one chunk of a session.
#[async_trait]
pub trait ChunkUrlLookup: Send + Sync {
    async fn event_chunk_url(&self, secure_id: &str, index: usize) -> Result<String, String>;
}

/// Downloads a payload URL and returns its raw event records.
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch_payload(&self, url: &str) -> Result<Vec<RawEvent>, String>;
}

/// Incremental events for a session that is still being recorded.
#[derive(Clone, Debug)]
pub struct LiveBatch {
    pub events: Vec<RawEvent>,
    /// Absolute UNIX timestamp (ms) of the latest user interaction.
    pub last_user_interaction_time_ms: i64,
}

/// Session-level queries.
#[async_trait]
pub trait SessionBackend: ChunkUrlLookup {
    /// Session metadata, or `None` if the session does not exist.
    async fn session(&self, secure_id: &str) -> Result<Option<SessionRecord>, String>;

    /// Chunk manifest ordered by chunk index.
    async fn event_chunks(&self, secure_id: &str) -> Result<Vec<Chunk>, String>;

    /// Activity intervals in relative playback time.
    async fn session_intervals(&self, secure_id: &str) -> Result<Vec<SessionInterval>, String>;

    /// Whole, unchunked session payload.
    async fn session_payload(&self, secure_id: &str) -> Result<Vec<RawEvent>, String>;

    /// Subscribe to events appended after the first `initial_events_count`.
    /// Default implementation returns an error.
    async fn subscribe_live(
        &self,
        _secure_id: &str,
        _initial_events_count: usize,
    ) -> Result<mpsc::Receiver<LiveBatch>, String> {
        Err("This backend does not support live sessions".to_string())
    }
}

/// Fetches payloads over HTTP(S) and decodes them as a JSON array.
#[derive(Clone)]
pub struct HttpPayloadFetcher {
    client: reqwest::Client,
}

impl HttpPayloadFetcher {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("session-player")
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PayloadFetcher for HttpPayloadFetcher {
    async fn fetch_payload(&self, url: &str) -> Result<Vec<RawEvent>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch payload: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Payload fetch returned status: {}", response.status()));
        }

        response
            .json::<Vec<RawEvent>>()
            .await
            .map_err(|e| format!("Failed to parse payload: {}", e))
    }
}
