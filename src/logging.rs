// src/logging.rs
//
// Timestamped logging for the replay engine. Messages always go to stderr;
// when file logging is enabled they are also appended to a per-run log file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Name of the symlink that always points at the newest log file.
const LATEST_LOG_NAME: &str = "player.log";

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and a `player.log` symlink (Unix only).
/// Returns the path of the new log file.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-player.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join(LATEST_LOG_NAME);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create {} symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                LATEST_LOG_NAME,
                e
            );
        }
    }

    {
        let mut guard = LOG_FILE.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(file);
    }

    // eprintln directly: tlog! would contend on LOG_FILE while we report on it
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    let mut guard = LOG_FILE.lock().unwrap_or_else(|e| e.into_inner());
    if guard.take().is_some() {
        eprintln!(
            "{} [logging] File logging stopped",
            chrono::Local::now().format("%H:%M:%S%.3f")
        );
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}
