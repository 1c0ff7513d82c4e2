// src/settings.rs
//
// Player configuration. Stored as JSON (or TOML, chosen by file extension)
// with per-field defaults so older files keep loading as fields are added.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::replay::pacing;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSettings {
    #[serde(default = "default_lookahead_ms")]
    pub lookahead_ms: i64,
    #[serde(default = "default_max_chunk_count")]
    pub max_chunk_count: usize,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    #[serde(default = "default_throttled_update_ms")]
    pub throttled_update_ms: u64,
    /// Projects whose sessions are always played from the whole payload.
    #[serde(default)]
    pub chunking_disabled_projects: Vec<String>,
    #[serde(default = "default_true")]
    pub skip_inactive: bool,
    #[serde(default)]
    pub auto_play_sessions: bool,
    #[serde(default)]
    pub auto_play_video: bool,
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f64,
    #[serde(default = "default_app_host")]
    pub app_host: String, // host used for shareable session links
}

fn default_lookahead_ms() -> i64 {
    pacing::LOOKAHEAD_MS
}
fn default_max_chunk_count() -> usize {
    pacing::MAX_CHUNK_COUNT
}
fn default_frame_ms() -> u64 {
    pacing::FRAME_MS
}
fn default_throttled_update_ms() -> u64 {
    pacing::THROTTLED_UPDATE_MS
}
fn default_true() -> bool {
    true
}
fn default_playback_speed() -> f64 {
    1.0
}
fn default_app_host() -> String {
    "app.highlight.run".to_string()
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            lookahead_ms: default_lookahead_ms(),
            max_chunk_count: default_max_chunk_count(),
            frame_ms: default_frame_ms(),
            throttled_update_ms: default_throttled_update_ms(),
            chunking_disabled_projects: Vec::new(),
            skip_inactive: default_true(),
            auto_play_sessions: false,
            auto_play_video: false,
            playback_speed: default_playback_speed(),
            app_host: default_app_host(),
        }
    }
}

impl PlayerSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.lookahead_ms <= 0 {
            return Err("lookahead_ms must be positive".to_string());
        }
        if self.max_chunk_count == 0 {
            return Err("max_chunk_count must be at least 1".to_string());
        }
        if self.frame_ms == 0 {
            return Err("frame_ms must be positive".to_string());
        }
        if self.playback_speed < 0.0 {
            return Err("playback_speed cannot be negative".to_string());
        }
        Ok(())
    }

    /// Whether chunked loading is disabled for the given project.
    pub fn chunking_disabled_for(&self, project_id: &str) -> bool {
        self.chunking_disabled_projects.iter().any(|p| p == project_id)
    }
}

/// Default settings file location under the platform config directory.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("session-player")
        .join("settings.json")
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

/// Load settings from `path`. On first run the defaults are written out.
pub fn load_settings(path: &Path) -> Result<PlayerSettings, String> {
    if !path.exists() {
        let settings = PlayerSettings::default();
        save_settings(path, &settings)?;
        return Ok(settings);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings: {}", e))?;

    let settings: PlayerSettings = if is_toml(path) {
        toml::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))?
    } else {
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))?
    };
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &PlayerSettings) -> Result<(), String> {
    settings.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings dir: {}", e))?;
    }

    let content = if is_toml(path) {
        toml::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?
    } else {
        serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?
    };

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}
