//! Tracing setup for the fleet binary.
//!
//! Logs go to stderr by default. When `settings.log_file` is set they are
//! written there instead as JSON lines, through a line-flushing writer, after
//! rotating the previous files (`fleet.log` → `fleet.log.1` → … → `.3`).
//! Stdout is never used: it belongs to whoever talks to us over stdio.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::config::placeholders::expand_tilde;
use crate::config::Settings;

/// Rotated log files kept next to the active one.
const KEEP_LOG_FILES: u32 = 3;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `settings.log_level`. Fails when the log
/// file cannot be opened or a subscriber is already installed.
pub fn init_tracing(settings: &Settings) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&settings.log_level)));

    let result = match settings.log_file.as_deref() {
        Some(path) => {
            let path = expand_tilde(path);
            let path = Path::new(&path);
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, KEEP_LOG_FILES);

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;

            fmt::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(FlushingWriter::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .try_init()
        }
        None => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .try_init(),
    };
    result.map_err(|e| std::io::Error::other(format!("failed to install tracing subscriber: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?settings.log_file,
        pid = std::process::id(),
        "=== mcp-fleet starting ==="
    );
    Ok(())
}

/// `mcp_fleet=<level>,warn`, falling back to `info` for unknown levels.
fn default_directive(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
        _ => "info".to_string(),
    };
    format!("mcp_fleet={level},warn")
}

/// Shift the previous logs of `base_path` up by one generation, keeping at
/// most `keep` of them; the live file becomes `.1`. Gaps are tolerated.
fn rotate_log_file(base_path: &Path, keep: u32) {
    if keep == 0 {
        return;
    }
    let generation = |n: u32| PathBuf::from(format!("{}.{n}", base_path.display()));

    let _ = std::fs::remove_file(generation(keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(generation(n), generation(n + 1));
    }
    if base_path.exists() {
        let _ = std::fs::rename(base_path, generation(1));
    }
}

/// Log file handle shared by every event; each event is flushed as written
/// so a killed supervisor still leaves a complete log.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    fn file(&self) -> MutexGuard<'_, std::fs::File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.file();
        file.write_all(buf)?;
        file.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file().flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
