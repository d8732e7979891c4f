//! Environment inputs recognized by the core, per §6. Loaded once at
//! process start following the canonicalize-and-env-fallback pattern the
//! teacher uses for its own `Config`.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Documents per Loader batch.
    pub batch_size: usize,
    /// Maximum wait for a gate tick.
    pub dequeue_timeout: Duration,
    /// Legacy poll cadence; unused by this design's single cooperative
    /// pipeline (see SPEC_FULL §6) but still read from the environment so
    /// operators migrating settings from the legacy service are not
    /// silently ignored.
    pub consumer_poll_interval: Duration,
    /// Grace period on shutdown.
    pub thread_join_timeout: Duration,
    /// Root directory for per-KB `documents/`, `index/` and checkpoint
    /// artifacts.
    pub content_root: PathBuf,
    /// Path to the Job Store's SQLite database file.
    pub store_path: PathBuf,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        EngineConfig {
            batch_size: env_usize("INGEST_BATCH_SIZE", 10),
            dequeue_timeout: Duration::from_secs(env_u64("INGEST_DEQUEUE_TIMEOUT_SECS", 30)),
            consumer_poll_interval: Duration::from_secs(env_u64(
                "INGEST_CONSUMER_POLL_INTERVAL_SECS",
                5,
            )),
            thread_join_timeout: Duration::from_secs(env_u64(
                "INGEST_THREAD_JOIN_TIMEOUT_SECS",
                5,
            )),
            content_root: std::env::var("INGEST_CONTENT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/kb")),
            store_path: std::env::var("INGEST_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/ingestion.sqlite3")),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
