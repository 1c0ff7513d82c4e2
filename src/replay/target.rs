// src/replay/target.rs
//
// Playback target and the generation lock that orders concurrent loads.
// Every recorded target bumps a monotonically increasing generation; async
// work captures the generation it was issued under and only commits state
// changes if that generation is still current.

use serde::Serialize;

/// Playback state a caller asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Playing,
    Paused,
}

/// Most recently requested playback intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Target {
    pub time_ms: Option<i64>,
    pub state: DesiredState,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            time_ms: None,
            state: DesiredState::Paused,
        }
    }
}

#[derive(Debug, Default)]
pub struct TargetLock {
    target: Target,
    generation: u64,
}

impl TargetLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the target and return the generation that now owns it.
    pub fn record(&mut self, time_ms: Option<i64>, state: DesiredState) -> u64 {
        self.target = Target { time_ms, state };
        self.generation += 1;
        self.generation
    }

    /// Replace only the time, keeping the desired state.
    pub fn record_time(&mut self, time_ms: i64) -> u64 {
        let state = self.target.state;
        self.record(Some(time_ms), state)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether work issued under `generation` may still commit its effects.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target_is_paused_without_time() {
        let lock = TargetLock::new();
        assert_eq!(lock.target(), Target::default());
        assert_eq!(lock.generation(), 0);
    }

    #[test]
    fn test_newer_record_supersedes_older_generation() {
        let mut lock = TargetLock::new();
        let first = lock.record(Some(1000), DesiredState::Playing);
        assert!(lock.is_current(first));

        let second = lock.record(Some(1000), DesiredState::Playing);
        assert!(!lock.is_current(first));
        assert!(lock.is_current(second));
    }

    #[test]
    fn test_record_time_keeps_state() {
        let mut lock = TargetLock::new();
        lock.record(Some(0), DesiredState::Playing);
        lock.record_time(4200);
        assert_eq!(
            lock.target(),
            Target {
                time_ms: Some(4200),
                state: DesiredState::Playing
            }
        );
    }
}
