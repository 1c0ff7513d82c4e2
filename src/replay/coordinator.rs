// src/replay/coordinator.rs
//
// Playback Coordinator - single owner of the replay state (chunk store,
// target, playback status) and the only writer of the chunk store.
// `ensure_chunks_loaded` is safe to call concurrently: chunks already in
// flight are joined instead of refetched, and a batch that has been
// superseded by a newer target still merges its data but does not commit
// any state change.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::chunk_store::EventChunkStore;
use super::loader::{ChunkLoad, ChunkLoader, LoadedChunk};
use super::resolver::ChunkIndexResolver;
use super::status::{PlaybackState, PlaybackStatus, StateTransition};
use super::target::{DesiredState, Target, TargetLock};
use super::window::WindowManager;
use crate::events::{EventSink, PlayerEvent};
use crate::model::{Chunk, Event, SessionInterval, SessionMetadata, SessionRecord, SessionResult};
use crate::settings::PlayerSettings;

/// Everything the coordinator owns for the current session.
#[derive(Debug, Default)]
pub struct ReplayState {
    pub project_id: Option<String>,
    pub secure_id: Option<String>,
    pub session: Option<SessionRecord>,
    pub metadata: SessionMetadata,
    pub resolver: ChunkIndexResolver,
    pub intervals: Vec<SessionInterval>,
    pub store: EventChunkStore,
    pub target: TargetLock,
    pub status: PlaybackStatus,
    pub session_results: Vec<SessionResult>,
    /// Bumped on every reset; loads issued under an older epoch are dropped.
    pub session_epoch: u64,
}

impl ReplayState {
    /// Last loaded event time relative to the session start.
    pub fn last_loaded_time_ms(&self) -> Option<i64> {
        self.store
            .last_loaded_event_timestamp()
            .map(|ts| ts - self.metadata.start_time_ms)
    }
}

/// Work captured under the state lock and awaited outside it.
struct LoadBatch {
    secure_id: String,
    generation: u64,
    epoch: u64,
    loads: Vec<(usize, ChunkLoad)>,
    /// State to restore once a blocking load requested without an action
    /// completes.
    resume: Option<DesiredState>,
}

#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    settings: PlayerSettings,
    loader: ChunkLoader,
    sink: EventSink,
    state: Mutex<ReplayState>,
}

impl PlaybackCoordinator {
    pub fn new(settings: PlayerSettings, loader: ChunkLoader, sink: EventSink) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                settings,
                loader,
                sink,
                state: Mutex::new(ReplayState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.inner.settings
    }

    pub fn loader(&self) -> &ChunkLoader {
        &self.inner.loader
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.inner.sink
    }

    /// Read-only access to the replay state.
    pub fn with_state<R>(&self, f: impl FnOnce(&ReplayState) -> R) -> R {
        f(&self.lock())
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut ReplayState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn state(&self) -> PlaybackState {
        self.lock().status.state()
    }

    pub fn time_ms(&self) -> i64 {
        self.lock().status.time_ms()
    }

    pub fn target(&self) -> Target {
        self.lock().target.target()
    }

    /// Flattened, time-ordered copy of all resident events.
    pub fn events(&self) -> Vec<Event> {
        self.lock().store.events()
    }

    pub fn resident_indexes(&self) -> Vec<usize> {
        self.lock().store.indexes_with_data()
    }

    pub(crate) fn emit_transition(&self, transition: Option<StateTransition>) {
        if let Some(t) = transition {
            self.inner.sink.emit(PlayerEvent::StateChanged {
                previous: t.previous,
                current: t.current,
            });
            if t.current == PlaybackState::SessionEnded {
                self.inner.sink.emit(PlayerEvent::SessionEnded);
            }
        }
    }

    /// Record a new playback intent. Any load issued earlier loses its right
    /// to commit state changes.
    pub fn record_target(&self, time_ms: Option<i64>, state: DesiredState) -> u64 {
        self.lock().target.record(time_ms, state)
    }

    /// Record a new target time, keeping the desired state.
    pub fn record_target_time(&self, time_ms: i64) -> u64 {
        self.lock().target.record_time(time_ms)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Forget the current session and enter Loading for `secure_id`.
    pub fn reset(&self, project_id: Option<String>, secure_id: Option<String>) {
        let transition = {
            let mut st = self.lock();
            st.store.clear();
            st.session = None;
            st.metadata = SessionMetadata::default();
            st.resolver = ChunkIndexResolver::default();
            st.intervals.clear();
            st.target = TargetLock::new();
            st.session_epoch += 1;
            st.project_id = project_id;
            st.secure_id = secure_id;
            tlog!(
                "[Coordinator:{}] Reset (epoch {})",
                st.secure_id.as_deref().unwrap_or("-"),
                st.session_epoch
            );
            st.status.reset()
        };
        self.inner.loader.clear();
        self.emit_transition(transition);
    }

    /// Install session metadata, manifest and intervals. A missing session
    /// leaves the player Empty.
    pub fn load_session(
        &self,
        session: Option<SessionRecord>,
        manifest: Vec<Chunk>,
        intervals: Vec<SessionInterval>,
    ) {
        let transition = {
            let mut st = self.lock();
            match session {
                Some(record) => {
                    st.metadata = record.metadata();
                    st.status.set_session_end_time(record.total_time_ms);
                    st.session = Some(record);
                    st.resolver = ChunkIndexResolver::new(manifest);
                    st.intervals = intervals;
                    None
                }
                None => {
                    tlog!(
                        "[Coordinator:{}] Session metadata unavailable",
                        st.secure_id.as_deref().unwrap_or("-")
                    );
                    st.status.mark_empty()
                }
            }
        };
        self.emit_transition(transition);
    }

    pub fn set_session_results(&self, results: Vec<SessionResult>) {
        self.lock().session_results = results;
    }

    /// Whether playback for the current session streams chunks.
    pub fn chunking_enabled(&self) -> bool {
        let st = self.lock();
        self.chunking_enabled_for(&st)
    }

    fn chunking_enabled_for(&self, st: &ReplayState) -> bool {
        let project_enabled = match &st.project_id {
            Some(project) => !self.inner.settings.chunking_disabled_for(project),
            None => false,
        };
        let session_chunked = st.session.as_ref().map(|s| s.chunked).unwrap_or(false);
        project_enabled && session_chunked && !st.resolver.is_empty() && st.secure_id.is_some()
    }

    /// Store an unchunked payload as chunk 0 and pause at the start.
    pub fn load_whole_payload(&self, events: Vec<Event>) {
        let resident = {
            let mut st = self.lock();
            if !events.is_empty() {
                st.store.insert(0, events);
            }
            st.store.indexes_with_data()
        };
        self.inner.sink.emit(PlayerEvent::EventsUpdated {
            resident_chunks: resident,
        });
        self.dispatch_action(0, DesiredState::Paused);
    }

    /// Load the first chunk and pause at the start, then prefetch the second
    /// manifest entry in the background.
    pub async fn load_initial_chunks(&self) {
        let (secure_id, epoch, first, next) = {
            let st = self.lock();
            let Some(secure_id) = st.secure_id.clone() else {
                return;
            };
            let chunks = st.resolver.chunks();
            let Some(first) = chunks.first().map(|c| c.index) else {
                return;
            };
            let next = chunks.get(1).map(|c| c.index);
            (secure_id, st.session_epoch, first, next)
        };

        let load = self.inner.loader.load(&secure_id, first);
        let loaded = load.clone().await;
        if !self.merge_loaded(&secure_id, epoch, &[(first, load)], vec![loaded]) {
            return;
        }
        self.emit_events_updated();
        self.dispatch_action(0, DesiredState::Paused);
        tlog!("[Coordinator:{}] Initial chunk complete", secure_id);

        if let Some(next) = next {
            let coordinator = self.clone();
            tokio::spawn(async move {
                let load = coordinator.inner.loader.load(&secure_id, next);
                let loaded = load.clone().await;
                if coordinator.merge_loaded(&secure_id, epoch, &[(next, load)], vec![loaded]) {
                    coordinator.emit_events_updated();
                    tlog!("[Coordinator:{}] Next chunk load complete", secure_id);
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Apply a chunk-load outcome to the playback status.
    pub fn dispatch_action(&self, time_ms: i64, action: DesiredState) {
        let transition = self.lock().status.apply_chunks_loaded(time_ms, action);
        self.inner.sink.emit(PlayerEvent::TimeChanged { time_ms });
        self.emit_transition(transition);
    }

    fn emit_events_updated(&self) {
        let resident = self.resident_indexes();
        self.inner.sink.emit(PlayerEvent::EventsUpdated {
            resident_chunks: resident,
        });
    }

    /// Merge results into the store and release their in-flight entries.
    /// Returns false if the session changed while they were loading.
    fn merge_loaded(
        &self,
        secure_id: &str,
        epoch: u64,
        loads: &[(usize, ChunkLoad)],
        results: Vec<LoadedChunk>,
    ) -> bool {
        let mut st = self.lock();
        if st.session_epoch != epoch {
            tlog!(
                "[Coordinator:{}] Dropping {} chunk(s) loaded for a previous session",
                secure_id,
                results.len()
            );
            return false;
        }
        for loaded in results {
            if let Some(idx) = loaded.index {
                st.store.insert(idx, loaded.events);
            }
        }
        for (idx, load) in loads {
            self.inner.loader.release(secure_id, *idx, load);
        }
        true
    }

    /// Make sure the chunks covering `[start_ms, end_ms]` are resident, then
    /// apply `action` (if any) at `start_ms`. Never fails: chunk fetch errors
    /// leave gaps rather than aborting the call. A call without an action that
    /// had to block on the cursor's chunk restores the target state afterwards.
    pub async fn ensure_chunks_loaded(
        &self,
        start_ms: i64,
        end_ms: Option<i64>,
        action: Option<DesiredState>,
        force_load_next: bool,
    ) {
        if !self.chunking_enabled() {
            if let Some(action) = action {
                self.dispatch_action(start_ms, action);
            }
            return;
        }

        let mut action = action;
        if let Some(batch) = self.plan_batch(start_ms, end_ms, action, force_load_next) {
            let results = join_all(batch.loads.iter().map(|(_, load)| load.clone())).await;
            if !self.merge_loaded(&batch.secure_id, batch.epoch, &batch.loads, results) {
                return;
            }

            let current = self.lock().target.is_current(batch.generation);
            if !current {
                tlog!(
                    "[Coordinator:{}] Load for {}ms superseded by a newer target",
                    batch.secure_id,
                    start_ms
                );
                return;
            }
            self.emit_events_updated();
            action = action.or(batch.resume);
        }

        if let Some(action) = action {
            self.dispatch_action(start_ms, action);
        }
    }

    /// Work out what to fetch, evict stale chunks and record the target.
    /// Returns `None` when the window is already resident.
    fn plan_batch(
        &self,
        start_ms: i64,
        end_ms: Option<i64>,
        action: Option<DesiredState>,
        force_load_next: bool,
    ) -> Option<LoadBatch> {
        let loader = &self.inner.loader;
        let settings = &self.inner.settings;

        let mut st = self.lock();
        let secure_id = st.secure_id.clone()?;
        let loading = loader.loading_indexes(&secure_id);

        let wm = WindowManager::new(&st.resolver, st.metadata.start_time_ms);
        let window = wm.window(start_ms, end_ms, force_load_next);
        let needed = wm.needed_indexes(&st.store, &loading, start_ms, end_ms, force_load_next);
        let joined: BTreeSet<usize> = window
            .indexes()
            .filter(|idx| !st.store.contains(*idx) && loading.contains(idx))
            .collect();

        if needed.is_empty() && joined.is_empty() {
            return None;
        }

        let cursor_idx = window.start;
        let evicted = if needed.is_empty() {
            BTreeSet::new()
        } else {
            wm.evictable(
                &st.store,
                window.start,
                cursor_idx,
                settings.max_chunk_count,
                settings.lookahead_ms,
            )
        };

        let blocking = needed.contains(&cursor_idx) || joined.contains(&cursor_idx);
        let transition = if blocking {
            tlog!(
                "[Coordinator:{}] Blocking load for chunk {}",
                secure_id,
                cursor_idx
            );
            st.status.begin_loading()
        } else {
            None
        };

        for idx in &evicted {
            st.store.remove(*idx);
        }

        let state = action.unwrap_or(st.target.target().state);
        let generation = st.target.record(Some(start_ms), state);
        let epoch = st.session_epoch;
        drop(st);

        if blocking {
            self.inner.sink.emit(PlayerEvent::LoadingStarted { index: cursor_idx });
            self.emit_transition(transition);
        }
        if !evicted.is_empty() {
            tlog!("[Coordinator:{}] Evicting chunks {:?}", secure_id, evicted);
            self.inner.sink.emit(PlayerEvent::ChunksEvicted {
                indexes: evicted.into_iter().collect(),
            });
        }

        tlog!(
            "[Coordinator:{}] Loading chunks {:?} (window {}..={}, joined {:?})",
            secure_id,
            needed,
            window.start,
            window.end,
            joined
        );
        let loads = needed
            .union(&joined)
            .map(|idx| (*idx, loader.load(&secure_id, *idx)))
            .collect();

        Some(LoadBatch {
            secure_id,
            generation,
            epoch,
            loads,
            resume: (blocking && action.is_none()).then_some(state),
        })
    }
}
