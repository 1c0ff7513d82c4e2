// src/replay/clock.rs
//
// Playback clock and frame scheduling.
// The clock maps wall-clock time onto playback time: it keeps a playback
// baseline and the wall-clock instant that baseline was taken at, and
// re-bases whenever the cursor jumps or the speed changes.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone, Debug)]
pub struct PlaybackClock {
    /// Playback time (ms) at `wall_clock_baseline`.
    playback_baseline_ms: i64,
    wall_clock_baseline: Instant,
    speed: f64,
    running: bool,
}

impl PlaybackClock {
    pub fn new(speed: f64) -> Self {
        Self {
            playback_baseline_ms: 0,
            wall_clock_baseline: Instant::now(),
            speed: if speed > 0.0 { speed } else { 1.0 },
            running: false,
        }
    }

    /// Start advancing from `time_ms`.
    pub fn start(&mut self, time_ms: i64) {
        self.rebase(time_ms);
        self.running = true;
    }

    /// Freeze at the current time and return it.
    pub fn stop(&mut self) -> i64 {
        let now = self.current_time_ms();
        self.rebase(now);
        self.running = false;
        now
    }

    /// Move the cursor without changing whether the clock runs.
    pub fn rebase(&mut self, time_ms: i64) {
        self.playback_baseline_ms = time_ms;
        self.wall_clock_baseline = Instant::now();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Change the playback multiplier. Re-bases so elapsed time so far is
    /// kept at the old speed.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), String> {
        if !(speed > 0.0) || !speed.is_finite() {
            return Err(format!("Invalid playback speed: {}", speed));
        }
        let now = self.current_time_ms();
        self.rebase(now);
        self.speed = speed;
        Ok(())
    }

    pub fn current_time_ms(&self) -> i64 {
        if !self.running {
            return self.playback_baseline_ms;
        }
        let elapsed_ms = self.wall_clock_baseline.elapsed().as_secs_f64() * 1000.0;
        self.playback_baseline_ms + (elapsed_ms * self.speed) as i64
    }
}

/// Drops frame ticks that arrive closer together than `min_interval`.
#[derive(Clone, Debug)]
pub struct FrameThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last: None,
        }
    }

    /// Whether a tick at `now` should be processed. Records it if so.
    pub fn should_process(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Runs a per-frame callback on a tokio interval. Only one frame loop is
/// active at a time; starting a new one cancels the previous.
#[derive(Default)]
pub struct FrameScheduler {
    task_handle: Option<JoinHandle<()>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start calling `on_frame` every `frame_ms`. The loop ends when the
    /// callback returns false or the scheduler is cancelled.
    pub fn start<F, Fut>(&mut self, frame_ms: u64, mut on_frame: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.cancel();
        let period = Duration::from_millis(frame_ms.max(1));
        self.task_handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !on_frame().await {
                    break;
                }
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
