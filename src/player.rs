// src/player.rs
//
// Player - the surface the rendering layer drives. Wraps the playback
// coordinator with the session lifecycle (load, reset, whole-payload
// fallback), play/pause/seek, the frame loop, live mode, autoplay-next and
// session export.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::{LiveBatch, PayloadFetcher, SessionBackend};
use crate::events::{EventSink, PlayerEvent};
use crate::links::{session_details_now, SessionDetails};
use crate::model::{find_next_session, to_events, Event, SessionResult};
use crate::replay::clock::{FrameScheduler, FrameThrottle, PlaybackClock};
use crate::replay::coordinator::PlaybackCoordinator;
use crate::replay::intervals::inactivity_end;
use crate::replay::live::{reconcile, LiveUpdate};
use crate::replay::loader::ChunkLoader;
use crate::replay::status::PlaybackState;
use crate::replay::target::DesiredState;
use crate::replay::window::WindowManager;
use crate::settings::PlayerSettings;

/// Frame loop state: the render clock, its throttle and the repeating timer.
struct FrameRuntime {
    clock: PlaybackClock,
    throttle: FrameThrottle,
    scheduler: FrameScheduler,
}

struct PlayerInner {
    coordinator: PlaybackCoordinator,
    sessions: Arc<dyn SessionBackend>,
    payloads: Arc<dyn PayloadFetcher>,
    frames: Mutex<FrameRuntime>,
    live_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.live_task.get_mut().ok().and_then(|h| h.take()) {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new<B>(
        settings: PlayerSettings,
        backend: Arc<B>,
        payloads: Arc<dyn PayloadFetcher>,
        sink: EventSink,
    ) -> Self
    where
        B: SessionBackend + 'static,
    {
        let loader = ChunkLoader::new(backend.clone(), payloads.clone());
        let frames = FrameRuntime {
            clock: PlaybackClock::new(settings.playback_speed),
            throttle: FrameThrottle::new(settings.throttled_update_ms),
            scheduler: FrameScheduler::new(),
        };
        Self {
            inner: Arc::new(PlayerInner {
                coordinator: PlaybackCoordinator::new(settings, loader, sink),
                sessions: backend,
                payloads,
                frames: Mutex::new(frames),
                live_task: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<PlayerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn frames(&self) -> MutexGuard<'_, FrameRuntime> {
        self.inner.frames.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.inner.coordinator
    }

    pub fn settings(&self) -> &PlayerSettings {
        self.inner.coordinator.settings()
    }

    fn session_tag(&self) -> String {
        self.inner
            .coordinator
            .with_state(|st| st.secure_id.clone())
            .unwrap_or_else(|| "-".to_string())
    }

    fn session_epoch(&self) -> u64 {
        self.inner.coordinator.with_state(|st| st.session_epoch)
    }

    // ------------------------------------------------------------------
    // Read-only view
    // ------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.inner.coordinator.state()
    }

    pub fn time_ms(&self) -> i64 {
        self.inner.coordinator.time_ms()
    }

    /// Flattened, time-ordered copy of all resident events.
    pub fn events(&self) -> Vec<Event> {
        self.inner.coordinator.events()
    }

    /// `time / total_time`, or `None` before metadata is known.
    pub fn progress(&self) -> Option<f64> {
        self.inner
            .coordinator
            .with_state(|st| st.status.progress(st.metadata.total_time_ms))
    }

    pub fn is_live(&self) -> bool {
        self.inner.coordinator.with_state(|st| st.status.is_live())
    }

    pub fn session_start_time_ms(&self) -> i64 {
        self.inner.coordinator.with_state(|st| st.metadata.start_time_ms)
    }

    pub fn is_player_ready(&self) -> bool {
        !matches!(self.state(), PlaybackState::Loading | PlaybackState::Empty)
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), String> {
        self.frames().clock.set_speed(speed)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Stop playback and forget the current session.
    pub fn reset(&self, project_id: Option<&str>, secure_id: Option<&str>) {
        {
            let mut frames = self.frames();
            frames.scheduler.cancel();
            frames.clock.stop();
            frames.clock.rebase(0);
            frames.throttle.reset();
        }
        self.detach_live_feed();
        self.inner
            .coordinator
            .reset(project_id.map(str::to_string), secure_id.map(str::to_string));
    }

    /// Reset to `secure_id`, fetch its metadata, manifest and intervals, and
    /// load the first chunk (or the whole payload for unchunked sessions).
    pub async fn load_session(&self, project_id: Option<&str>, secure_id: &str) {
        self.reset(project_id, Some(secure_id));
        let epoch = self.session_epoch();
        let coordinator = &self.inner.coordinator;
        let sessions = &self.inner.sessions;

        let session = match sessions.session(secure_id).await {
            Ok(session) => session,
            Err(e) => {
                tlog!("[Player:{}] Failed to load session: {}", secure_id, e);
                None
            }
        };
        if session.is_none() {
            coordinator.load_session(None, Vec::new(), Vec::new());
            return;
        }

        let manifest = sessions.event_chunks(secure_id).await.unwrap_or_else(|e| {
            tlog!("[Player:{}] Failed to load chunk manifest: {}", secure_id, e);
            Vec::new()
        });
        let intervals = sessions.session_intervals(secure_id).await.unwrap_or_else(|e| {
            tlog!("[Player:{}] Failed to load intervals: {}", secure_id, e);
            Vec::new()
        });
        if self.session_epoch() != epoch {
            return;
        }
        coordinator.load_session(session, manifest, intervals);

        if coordinator.chunking_enabled() {
            coordinator.load_initial_chunks().await;
        } else {
            tlog!("[Player:{}] Loading whole session payload", secure_id);
            let events = match sessions.session_payload(secure_id).await {
                Ok(raw) => to_events(&raw),
                Err(e) => {
                    tlog!("[Player:{}] Failed to load session payload: {}", secure_id, e);
                    Vec::new()
                }
            };
            if self.session_epoch() != epoch {
                return;
            }
            coordinator.load_whole_payload(events);
        }

        if self.session_epoch() == epoch
            && self.settings().auto_play_video
            && self.state() != PlaybackState::Playing
        {
            tlog!("[Player:{}] Auto playing", secure_id);
            self.play(Some(0)).await;
        }
    }

    pub fn set_session_results(&self, results: Vec<SessionResult>) {
        self.inner.coordinator.set_session_results(results);
    }

    // ------------------------------------------------------------------
    // Playback controls
    // ------------------------------------------------------------------

    /// Record a new cursor time and push it to listeners and the clock.
    fn move_cursor(&self, time_ms: i64) {
        self.inner
            .coordinator
            .with_state_mut(|st| st.status.set_time(time_ms));
        self.inner
            .coordinator
            .sink()
            .emit(PlayerEvent::TimeChanged { time_ms });
        self.frames().clock.rebase(time_ms);
    }

    /// Play from `time_ms` (or the current time).
    pub async fn play(&self, time_ms: Option<i64>) {
        let coordinator = &self.inner.coordinator;
        let time = time_ms.unwrap_or_else(|| self.current_time_ms());
        coordinator.record_target(Some(time), DesiredState::Playing);
        self.move_cursor(time);

        let (end, live) = coordinator.with_state(|st| {
            (st.status.session_end_time_ms(), st.status.is_live())
        });
        if !live && end > 0 && time >= end {
            tlog!(
                "[Player:{}] play({}) at or past session end {}",
                self.session_tag(),
                time,
                end
            );
            coordinator.dispatch_action(time, DesiredState::Playing);
        } else {
            coordinator
                .ensure_chunks_loaded(time, None, Some(DesiredState::Playing), false)
                .await;
        }
        self.after_dispatch().await;
    }

    /// Pause at `time_ms`, or in place when no time is given.
    pub async fn pause(&self, time_ms: Option<i64>) {
        let coordinator = &self.inner.coordinator;
        match time_ms {
            Some(time) => {
                coordinator.record_target(Some(time), DesiredState::Paused);
                self.move_cursor(time);
                coordinator
                    .ensure_chunks_loaded(time, None, Some(DesiredState::Paused), false)
                    .await;
            }
            None => {
                let time = self.current_time_ms();
                coordinator.record_target(None, DesiredState::Paused);
                let transition = coordinator.with_state_mut(|st| {
                    st.status.set_time(time);
                    st.status.pause_in_place()
                });
                coordinator.sink().emit(PlayerEvent::TimeChanged { time_ms: time });
                coordinator.emit_transition(transition);
            }
        }
        self.sync_frame_loop();
    }

    /// Move the cursor, keeping the requested play/pause state. Lands at the
    /// end of an inactive interval when skipping inactivity.
    pub async fn seek(&self, time_ms: i64) {
        let coordinator = &self.inner.coordinator;
        let (time, desired) = coordinator.with_state(|st| {
            let mut time = time_ms;
            if self.settings().skip_inactive {
                if let Some(end) = inactivity_end(&st.intervals, time_ms) {
                    tlog!(
                        "[Player:{}] Seek to {} lands in inactivity, skipping to {}",
                        st.secure_id.as_deref().unwrap_or("-"),
                        time_ms,
                        end
                    );
                    time = end;
                }
            }
            (time, st.target.target().state)
        });

        coordinator.record_target(Some(time), desired);
        self.move_cursor(time);
        coordinator
            .ensure_chunks_loaded(time, None, Some(desired), false)
            .await;
        self.after_dispatch().await;
    }

    /// Render-clock time while playing, otherwise the status time.
    fn current_time_ms(&self) -> i64 {
        let clock_time = {
            let frames = self.frames();
            frames.clock.is_running().then(|| frames.clock.current_time_ms())
        };
        clock_time.unwrap_or_else(|| self.time_ms())
    }

    async fn after_dispatch(&self) {
        self.sync_frame_loop();
        if self.state() == PlaybackState::SessionEnded {
            self.on_session_ended().await;
        }
    }

    /// Continue with the next session in the result list when autoplay is on.
    async fn on_session_ended(&self) {
        if !self.settings().auto_play_sessions {
            return;
        }
        let (project_id, current, next) = self.inner.coordinator.with_state(|st| {
            let next = st
                .secure_id
                .as_deref()
                .and_then(|id| find_next_session(&st.session_results, id))
                .map(|s| s.secure_id.clone());
            (st.project_id.clone(), st.secure_id.clone(), next)
        });
        let Some(next) = next else {
            return;
        };

        tlog!(
            "[Player:{}] Session ended, continuing with {}",
            current.as_deref().unwrap_or("-"),
            next
        );
        self.pause(Some(self.time_ms())).await;
        self.reset(project_id.as_deref(), None);
        self.inner
            .coordinator
            .sink()
            .emit(PlayerEvent::NavigateToSession { secure_id: next });
    }

    // ------------------------------------------------------------------
    // Frame loop
    // ------------------------------------------------------------------

    /// Run the frame loop while playing or live, stop it otherwise.
    fn sync_frame_loop(&self) {
        let (state, live) = self
            .inner
            .coordinator
            .with_state(|st| (st.status.state(), st.status.is_live()));
        let frame_ms = self.settings().frame_ms;
        let mut frames = self.frames();

        if state == PlaybackState::Playing || live {
            if !frames.scheduler.is_active() {
                frames.throttle.reset();
                let weak = Arc::downgrade(&self.inner);
                frames.scheduler.start(frame_ms, move || {
                    let player = Player::from_weak(&weak);
                    async move { player.map(|p| p.tick_frame()).unwrap_or(false) }
                });
            }
        } else {
            frames.scheduler.cancel();
            if frames.clock.is_running() {
                frames.clock.stop();
            }
        }
    }

    /// One frame. Returns false once the loop should stop.
    fn tick_frame(&self) -> bool {
        let coordinator = &self.inner.coordinator;
        let (state, live, status_time) = coordinator.with_state(|st| {
            (st.status.state(), st.status.is_live(), st.status.time_ms())
        });

        let now_ms = {
            let mut frames = self.frames();
            if state != PlaybackState::Playing {
                if frames.clock.is_running() {
                    frames.clock.stop();
                }
                return live;
            }
            if !frames.clock.is_running() {
                frames.clock.start(status_time);
            }
            if !frames.throttle.should_process(Instant::now()) {
                return true;
            }
            frames.clock.current_time_ms()
        };

        if coordinator.chunking_enabled() && self.has_outrun_loaded_data(now_ms) {
            tlog!(
                "[Player:{}] Playing outside loaded data at {}",
                self.session_tag(),
                now_ms
            );
            self.frames().clock.stop();
            let player = self.clone();
            tokio::spawn(async move { player.play(Some(now_ms)).await });
            return true;
        }

        let (transition, time) = coordinator.with_state_mut(|st| {
            let transition = st.status.advance_to(now_ms);
            (transition, st.status.time_ms())
        });
        coordinator.sink().emit(PlayerEvent::TimeChanged { time_ms: time });

        if transition.map(|t| t.current) == Some(PlaybackState::SessionEnded) {
            coordinator.emit_transition(transition);
            self.frames().clock.stop();
            let player = self.clone();
            tokio::spawn(async move { player.on_session_ended().await });
            return false;
        }
        coordinator.emit_transition(transition);

        let player = self.clone();
        tokio::spawn(async move { player.on_time_change(time).await });
        true
    }

    /// Cursor is past the last loaded event and its chunk is not resident.
    fn has_outrun_loaded_data(&self, time_ms: i64) -> bool {
        self.inner.coordinator.with_state(|st| {
            let past_loaded = st
                .last_loaded_time_ms()
                .map(|last| time_ms > last)
                .unwrap_or(true);
            let idx = WindowManager::new(&st.resolver, st.metadata.start_time_ms).index_at(time_ms);
            past_loaded && !st.store.contains(idx)
        })
    }

    /// Lookahead tick: skip inactivity, otherwise keep the next
    /// `lookahead_ms` of chunks resident.
    pub async fn on_time_change(&self, time_ms: i64) {
        let coordinator = &self.inner.coordinator;
        let settings = self.settings();
        let (ready, inactive_until, last_loaded) = coordinator.with_state(|st| {
            let ready = st.session.is_some() && st.status.state() == PlaybackState::Playing;
            let inactive_until = if settings.skip_inactive {
                inactivity_end(&st.intervals, time_ms)
            } else {
                None
            };
            (ready, inactive_until, st.last_loaded_time_ms())
        });
        if !ready {
            return;
        }

        if let Some(end) = inactive_until {
            tlog!(
                "[Player:{}] Skipping inactivity at {} to {}",
                self.session_tag(),
                time_ms,
                end
            );
            self.play(Some(end)).await;
            return;
        }

        let force_load_next = last_loaded
            .map(|last| last - time_ms < settings.lookahead_ms)
            .unwrap_or(true);
        coordinator
            .ensure_chunks_loaded(
                time_ms,
                Some(time_ms + settings.lookahead_ms),
                None,
                force_load_next,
            )
            .await;
        self.sync_frame_loop();
    }

    // ------------------------------------------------------------------
    // Live mode
    // ------------------------------------------------------------------

    /// Toggle live playback. Turning it on subscribes to appended events and
    /// plays from the current time; turning it off pauses at the start.
    pub async fn set_live_mode(&self, live: bool) {
        if self.is_live() == live {
            return;
        }
        let coordinator = &self.inner.coordinator;
        coordinator.with_state_mut(|st| st.status.set_live(live));

        if live {
            if let Err(e) = self.attach_live_feed().await {
                tlog!("[Player:{}] Live subscription failed: {}", self.session_tag(), e);
            }
            self.play(None).await;
        } else {
            tlog!("[Player:{}] Leaving live mode", self.session_tag());
            self.detach_live_feed();
            self.pause(Some(0)).await;
        }
    }

    /// Subscribe to appended events and merge every batch as it arrives.
    pub async fn attach_live_feed(&self) -> Result<(), String> {
        let (secure_id, initial_events_count) = self
            .inner
            .coordinator
            .with_state(|st| (st.secure_id.clone(), st.store.event_count()));
        let secure_id = secure_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "Session ID is empty".to_string())?;

        let mut rx = self
            .inner
            .sessions
            .subscribe_live(&secure_id, initial_events_count)
            .await?;
        tlog!(
            "[Player:{}] Live mode subscribed after {} events",
            secure_id,
            initial_events_count
        );

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let Some(player) = Player::from_weak(&weak) else {
                    break;
                };
                player.apply_live_batch(&batch);
            }
        });

        let mut live_task = self.inner.live_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = live_task.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn detach_live_feed(&self) {
        let handle = self
            .inner
            .live_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Merge a streamed batch into chunk 0.
    pub fn apply_live_batch(&self, batch: &LiveBatch) -> Option<LiveUpdate> {
        let coordinator = &self.inner.coordinator;
        let update = coordinator.with_state_mut(|st| {
            let session_start_ms = st.metadata.start_time_ms;
            reconcile(&mut st.store, &mut st.status, session_start_ms, batch)
        })?;

        let sink = coordinator.sink();
        sink.emit(PlayerEvent::LiveEventsAppended {
            count: update.appended,
            first_timestamp_ms: update.first_new_timestamp_ms,
            last_timestamp_ms: update.last_new_timestamp_ms,
            last_active_ms: update.last_active_timestamp_ms,
        });
        sink.emit(PlayerEvent::EventsUpdated {
            resident_chunks: coordinator.resident_indexes(),
        });
        Some(update)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Shareable links for the current session.
    pub fn session_details(&self) -> Result<SessionDetails, String> {
        let (project_id, secure_id, start) = self.inner.coordinator.with_state(|st| {
            (
                st.project_id.clone().unwrap_or_default(),
                st.secure_id.clone().unwrap_or_default(),
                st.metadata.start_time_ms,
            )
        });
        session_details_now(&self.settings().app_host, &project_id, &secure_id, start)
    }

    /// Fetch the session's full event payload for download.
    /// Returns `(file name, JSON)`.
    pub async fn download_session_events(&self) -> Result<(String, String), String> {
        let (secure_id, url) = self.inner.coordinator.with_state(|st| {
            (
                st.secure_id.clone(),
                st.session.as_ref().and_then(|s| s.direct_download_url.clone()),
            )
        });
        let secure_id = secure_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "Session ID is empty".to_string())?;
        let url = url.ok_or_else(|| format!("No download URL for session {}", secure_id))?;

        let raw = self.inner.payloads.fetch_payload(&url).await?;
        let events = to_events(&raw);
        let json = serde_json::to_string(&events)
            .map_err(|e| format!("Failed to serialize events: {}", e))?;
        tlog!(
            "[Player:{}] Prepared download of {} events",
            secure_id,
            events.len()
        );
        Ok((format!("session-{}.json", secure_id), json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChunkUrlLookup, SessionBackend};
    use crate::model::{Chunk, RawEvent, SessionInterval, SessionRecord};
    use crate::replay::coordinator::tests::{backend as memory_chunks, manifest, record};
    use crate::replay::loader::tests::MemoryChunks;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct TestBackend {
        chunks: Arc<MemoryChunks>,
        session: Option<SessionRecord>,
        manifest: Vec<Chunk>,
        intervals: Vec<SessionInterval>,
        payload: Vec<RawEvent>,
        live: Mutex<Option<mpsc::Receiver<LiveBatch>>>,
    }

    impl TestBackend {
        fn chunked(n: usize) -> Self {
            Self {
                chunks: memory_chunks(n, 0),
                session: Some(record(true, n as i64 * 1000)),
                manifest: manifest(n),
                intervals: Vec::new(),
                payload: Vec::new(),
                live: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ChunkUrlLookup for TestBackend {
        async fn event_chunk_url(&self, secure_id: &str, index: usize) -> Result<String, String> {
            self.chunks.event_chunk_url(secure_id, index).await
        }
    }

    #[async_trait]
    impl PayloadFetcher for TestBackend {
        async fn fetch_payload(&self, url: &str) -> Result<Vec<RawEvent>, String> {
            if url == "mem://download" {
                return Ok(self.payload.clone());
            }
            self.chunks.fetch_payload(url).await
        }
    }

    #[async_trait]
    impl SessionBackend for TestBackend {
        async fn session(&self, _secure_id: &str) -> Result<Option<SessionRecord>, String> {
            Ok(self.session.clone())
        }

        async fn event_chunks(&self, _secure_id: &str) -> Result<Vec<Chunk>, String> {
            Ok(self.manifest.clone())
        }

        async fn session_intervals(&self, _secure_id: &str) -> Result<Vec<SessionInterval>, String> {
            Ok(self.intervals.clone())
        }

        async fn session_payload(&self, _secure_id: &str) -> Result<Vec<RawEvent>, String> {
            Ok(self.payload.clone())
        }

        async fn subscribe_live(
            &self,
            _secure_id: &str,
            _initial_events_count: usize,
        ) -> Result<mpsc::Receiver<LiveBatch>, String> {
            self.live
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| "already subscribed".to_string())
        }
    }

    fn player_with(
        backend: TestBackend,
        settings: PlayerSettings,
    ) -> (Player, Arc<TestBackend>, mpsc::UnboundedReceiver<PlayerEvent>) {
        let backend = Arc::new(backend);
        let (sink, rx) = EventSink::channel();
        let player = Player::new(settings, backend.clone(), backend.clone(), sink);
        (player, backend, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn raw(stamps: &[i64]) -> Vec<RawEvent> {
        stamps
            .iter()
            .map(|ts| json!({"type": 3, "timestamp": ts, "data": {}}))
            .collect()
    }

    #[tokio::test]
    async fn test_load_session_pauses_at_start() {
        let (player, _backend, _rx) = player_with(TestBackend::chunked(3), PlayerSettings::default());
        assert!(!player.is_player_ready());

        player.load_session(Some("1"), "abc").await;
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.time_ms(), 0);
        assert!(player.is_player_ready());
        assert!(!player.events().is_empty());
        assert_eq!(player.progress(), Some(0.0));
        assert_eq!(player.session_start_time_ms(), 100_000);
    }

    #[tokio::test]
    async fn test_missing_session_is_empty() {
        let mut backend = TestBackend::chunked(3);
        backend.session = None;
        let (player, _backend, _rx) = player_with(backend, PlayerSettings::default());

        player.load_session(Some("1"), "abc").await;
        assert_eq!(player.state(), PlaybackState::Empty);
        assert!(!player.is_player_ready());
    }

    #[tokio::test]
    async fn test_unchunked_session_uses_whole_payload() {
        let mut backend = TestBackend::chunked(3);
        backend.session = Some(record(false, 3000));
        backend.payload = raw(&[100_000, 101_500, 102_000]);
        let (player, backend, _rx) = player_with(backend, PlayerSettings::default());

        player.load_session(Some("1"), "abc").await;
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.events().len(), 3);
        assert_eq!(player.coordinator().resident_indexes(), vec![0]);
        assert_eq!(backend.chunks.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_play_past_end_does_not_fetch() {
        let (player, backend, _rx) = player_with(TestBackend::chunked(3), PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fetched = backend.chunks.fetch_count();

        player.play(Some(3000)).await;
        assert_eq!(player.state(), PlaybackState::SessionEnded);
        assert_eq!(player.time_ms(), 3000);
        assert_eq!(backend.chunks.fetch_count(), fetched);
    }

    #[tokio::test]
    async fn test_seek_skips_inactive_interval_and_keeps_state() {
        let mut backend = TestBackend::chunked(3);
        backend.intervals = vec![
            SessionInterval { start_time_ms: 0, end_time_ms: 1000, active: true },
            SessionInterval { start_time_ms: 1000, end_time_ms: 2500, active: false },
            SessionInterval { start_time_ms: 2500, end_time_ms: 3000, active: true },
        ];
        let (player, _backend, _rx) = player_with(backend, PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;

        player.seek(1200).await;
        assert_eq!(player.time_ms(), 2500);
        assert_eq!(player.state(), PlaybackState::Paused);
        assert!(player.coordinator().resident_indexes().contains(&2));
    }

    #[tokio::test]
    async fn test_seek_during_play_load_keeps_playing() {
        let mut backend = TestBackend::chunked(5);
        backend.chunks = memory_chunks(5, 20);
        let (player, _backend, _rx) = player_with(backend, PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;

        futures::join!(player.play(Some(3500)), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(player.state(), PlaybackState::Loading);
            player.seek(3600).await;
        });
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.coordinator().target().state, DesiredState::Playing);
        assert!(player.time_ms() >= 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_continues_over_failed_chunk() {
        let backend = TestBackend::chunked(4);
        backend.chunks.failing.lock().unwrap().insert(1);
        let (player, backend, _rx) = player_with(backend, PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;

        player.play(Some(0)).await;
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_ne!(player.state(), PlaybackState::Loading);

        backend.chunks.failing.lock().unwrap().clear();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(player.state(), PlaybackState::Playing);
        assert!(player.time_ms() > 2000);
    }

    #[tokio::test]
    async fn test_pause_in_place() {
        let (player, _backend, mut rx) = player_with(TestBackend::chunked(3), PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;

        player.play(Some(500)).await;
        assert_eq!(player.state(), PlaybackState::Playing);
        player.pause(None).await;
        assert_eq!(player.state(), PlaybackState::Paused);
        assert!(drain(&mut rx).contains(&PlayerEvent::StateChanged {
            previous: PlaybackState::Playing,
            current: PlaybackState::Paused,
        }));
    }

    #[tokio::test]
    async fn test_newer_pause_wins_over_slower_play() {
        let mut backend = TestBackend::chunked(5);
        backend.chunks = memory_chunks(5, 20);
        let (player, _backend, _rx) = player_with(backend, PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;

        futures::join!(player.play(Some(3500)), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            player.pause(Some(100)).await;
        });
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.time_ms(), 100);
        assert!(player.coordinator().resident_indexes().contains(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_runs_to_session_end() {
        let (player, _backend, mut rx) = player_with(TestBackend::chunked(3), PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;

        player.play(Some(0)).await;
        tokio::time::sleep(Duration::from_millis(4000)).await;

        assert_eq!(player.state(), PlaybackState::SessionEnded);
        assert_eq!(player.time_ms(), 3000);
        assert!(drain(&mut rx).contains(&PlayerEvent::SessionEnded));
        assert_eq!(player.coordinator().resident_indexes(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_autoplay_navigates_to_next_session() {
        let mut settings = PlayerSettings::default();
        settings.auto_play_sessions = true;
        let (player, _backend, mut rx) = player_with(TestBackend::chunked(3), settings);
        player.load_session(Some("1"), "abc").await;
        player.set_session_results(vec![
            SessionResult { secure_id: "abc".to_string() },
            SessionResult { secure_id: "def".to_string() },
        ]);

        player.play(Some(3000)).await;
        assert!(drain(&mut rx).contains(&PlayerEvent::NavigateToSession {
            secure_id: "def".to_string()
        }));
        assert_eq!(player.state(), PlaybackState::Loading);
    }

    #[tokio::test]
    async fn test_auto_play_video_starts_playback() {
        let mut settings = PlayerSettings::default();
        settings.auto_play_video = true;
        let (player, _backend, _rx) = player_with(TestBackend::chunked(3), settings);

        player.load_session(Some("1"), "abc").await;
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_live_batches_extend_session() {
        let backend = TestBackend::chunked(1);
        let (tx, rx_live) = mpsc::channel(4);
        *backend.live.lock().unwrap() = Some(rx_live);
        let (player, _backend, mut rx) = player_with(backend, PlayerSettings::default());
        player.load_session(Some("1"), "abc").await;
        let before = player.events().len();

        player.set_live_mode(true).await;
        assert!(player.is_live());
        tx.send(LiveBatch {
            events: raw(&[101_500, 102_500]),
            last_user_interaction_time_ms: 102_400,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(player.events().len(), before + 2);
        let end = player.coordinator().with_state(|st| st.status.session_end_time_ms());
        assert_eq!(end, 2500);
        assert!(drain(&mut rx).contains(&PlayerEvent::LiveEventsAppended {
            count: 2,
            first_timestamp_ms: 101_500,
            last_timestamp_ms: 102_500,
            last_active_ms: 102_400
        }));

        player.set_live_mode(false).await;
        assert!(!player.is_live());
        assert_eq!(player.state(), PlaybackState::Paused);
        assert_eq!(player.time_ms(), 0);
    }

    #[tokio::test]
    async fn test_download_session_events() {
        let mut backend = TestBackend::chunked(1);
        let mut session = record(true, 1000);
        session.direct_download_url = Some("mem://download".to_string());
        backend.session = Some(session);
        backend.payload = raw(&[100_200, 100_100]);
        let (player, _backend, _rx) = player_with(backend, PlayerSettings::default());

        assert!(player.download_session_events().await.is_err());
        player.load_session(Some("1"), "abc").await;
        let (name, json) = player.download_session_events().await.unwrap();
        assert_eq!(name, "session-abc.json");
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[tokio::test]
    async fn test_session_details_for_loaded_session() {
        let (player, _backend, _rx) = player_with(TestBackend::chunked(1), PlayerSettings::default());
        assert!(player.session_details().is_err());

        player.load_session(Some("1"), "abc").await;
        let details = player.session_details().unwrap();
        assert_eq!(details.url, "https://app.highlight.run/1/sessions/abc");
        assert!(details.url_with_timestamp.contains("?ts="));
    }
}
