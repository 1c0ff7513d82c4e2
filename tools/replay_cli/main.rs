// tools/replay_cli/main.rs
//
// Replays a session exported to a directory:
//   session.json     session record
//   chunks.json      chunk manifest (optional for unchunked sessions)
//   intervals.json   activity intervals (optional)
//   chunk_<n>.json   raw events of chunk n
//   payload.json     whole payload of an unchunked session
//
// Usage:
//   cargo run --features cli --bin replay_cli -- path/to/export --speed 4

use async_trait::async_trait;
use clap::Parser;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use session_player::{
    init_file_logging, load_settings, Chunk, ChunkUrlLookup, EventSink, PayloadFetcher,
    PlaybackState, Player, PlayerEvent, RawEvent, SessionBackend, SessionInterval, SessionRecord,
};

#[derive(Parser, Debug)]
#[command(about = "Replay an exported session and print playback transitions")]
struct Args {
    /// Export directory
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Project the session belongs to
    #[arg(long, default_value = "local")]
    project: String,

    /// Playback start (ms, relative to the session start)
    #[arg(long, default_value_t = 0)]
    start_ms: i64,

    /// Playback speed multiplier
    #[arg(long)]
    speed: Option<f64>,

    /// Stop after this much wall-clock time (ms)
    #[arg(long)]
    max_wall_ms: Option<u64>,

    /// Settings file (JSON or TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write a log file to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Serves an export directory through the collaborator traits.
struct DirectoryBackend {
    dir: PathBuf,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

impl DirectoryBackend {
    fn read_optional<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, String> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        read_json(&path)
    }
}

#[async_trait]
impl ChunkUrlLookup for DirectoryBackend {
    async fn event_chunk_url(&self, _secure_id: &str, index: usize) -> Result<String, String> {
        let path = self.dir.join(format!("chunk_{}.json", index));
        if !path.exists() {
            return Err(format!("Chunk file {} not found", path.display()));
        }
        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl PayloadFetcher for DirectoryBackend {
    async fn fetch_payload(&self, url: &str) -> Result<Vec<RawEvent>, String> {
        read_json(Path::new(url))
    }
}

#[async_trait]
impl SessionBackend for DirectoryBackend {
    async fn session(&self, _secure_id: &str) -> Result<Option<SessionRecord>, String> {
        let path = self.dir.join("session.json");
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    async fn event_chunks(&self, _secure_id: &str) -> Result<Vec<Chunk>, String> {
        self.read_optional("chunks.json")
    }

    async fn session_intervals(&self, _secure_id: &str) -> Result<Vec<SessionInterval>, String> {
        self.read_optional("intervals.json")
    }

    async fn session_payload(&self, _secure_id: &str) -> Result<Vec<RawEvent>, String> {
        read_json(&self.dir.join("payload.json"))
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    if let Some(log_dir) = &args.log_dir {
        init_file_logging(log_dir)?;
    }
    let mut settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => Default::default(),
    };
    if let Some(speed) = args.speed {
        settings.playback_speed = speed;
    }
    settings.validate()?;

    let backend = Arc::new(DirectoryBackend {
        dir: args.dir.clone(),
    });
    let secure_id = backend
        .session("")
        .await?
        .map(|s| s.secure_id)
        .ok_or_else(|| format!("No session.json in {}", args.dir.display()))?;

    let (sink, mut rx) = EventSink::channel();
    let player = Player::new(settings, backend.clone(), backend, sink);
    player.load_session(Some(&args.project), &secure_id).await;
    if player.state() == PlaybackState::Empty {
        return Err(format!("Session {} could not be loaded", secure_id));
    }
    println!(
        "Loaded session {} ({} events resident)",
        secure_id,
        player.events().len()
    );

    player.play(Some(args.start_ms)).await;

    let deadline = args
        .max_wall_ms
        .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));
    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    println!("Stopped at {}ms", player.time_ms());
                    break;
                }
            },
            None => rx.recv().await,
        };
        let Some(event) = next else {
            break;
        };
        match &event {
            PlayerEvent::StateChanged { previous, current } => {
                println!("{:>8}ms  {:?} -> {:?}", player.time_ms(), previous, current)
            }
            PlayerEvent::LoadingStarted { index } => {
                println!("{:>8}ms  loading chunk {}", player.time_ms(), index)
            }
            PlayerEvent::ChunksEvicted { indexes } => {
                println!("{:>8}ms  evicted {:?}", player.time_ms(), indexes)
            }
            PlayerEvent::SessionEnded => {
                println!("{:>8}ms  session ended", player.time_ms());
                break;
            }
            _ => {}
        }
    }

    player.pause(None).await;
    Ok(())
}
