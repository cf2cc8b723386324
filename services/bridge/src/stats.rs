//! JSON-backed store for per-channel processed/error counters.
//!
//! One flat object keyed by channel name:
//! `{"Lab-Feed":{"processed":7,"errors":0}}`. Every update is
//! put-and-flush under a single lock; a flush failure is logged and
//! swallowed, leaving the in-memory counters authoritative for the
//! session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persisted counter pair for one channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Successfully processed inputs.
    pub processed: u64,
    /// Failed inputs.
    pub errors: u64,
}

/// Thread-safe counter persistence, shared by every channel.
pub struct StatsStore {
    path: PathBuf,
    counts: Mutex<HashMap<String, StatsRecord>>,
}

impl StatsStore {
    /// Open the store, restoring whatever the file currently holds.
    /// A missing or unreadable file starts the store empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let counts = match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(map) => map,
                Err(e) => {
                    warn!(file = %path.display(), "stats file unreadable, starting fresh: {e}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!(file = %path.display(), channels = counts.len(), "stats store opened");
        Self {
            path,
            counts: Mutex::new(counts),
        }
    }

    /// Counters for `name`, zeroes when the channel is unknown.
    pub fn get(&self, name: &str) -> StatsRecord {
        self.counts.lock().get(name).copied().unwrap_or_default()
    }

    /// Replace the record for `name` and write the file.
    pub fn put_and_flush(&self, name: &str, processed: u64, errors: u64) {
        let mut counts = self.counts.lock();
        counts.insert(name.to_string(), StatsRecord { processed, errors });
        self.flush_locked(&counts);
    }

    /// Write the current in-memory state to disk.
    pub fn flush(&self) {
        let counts = self.counts.lock();
        self.flush_locked(&counts);
    }

    /// Copy of every record.
    pub fn snapshot(&self) -> HashMap<String, StatsRecord> {
        self.counts.lock().clone()
    }

    fn flush_locked(&self, counts: &HashMap<String, StatsRecord>) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string(counts).expect("counter map serializes");
            std::fs::write(&self.path, json)
        };
        if let Err(e) = write() {
            warn!(file = %self.path.display(), "stats flush failed: {e}");
        }
    }
}

/// Live counters for one running channel.
///
/// Atomic so status reads never contend with the hot path; persisted
/// through the [`StatsStore`] after every increment.
#[derive(Debug, Default)]
pub struct ChannelCounters {
    processed: AtomicU64,
    errors: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl ChannelCounters {
    /// Counters restored from a persisted record.
    pub fn restore(record: StatsRecord) -> Self {
        Self {
            processed: AtomicU64::new(record.processed),
            errors: AtomicU64::new(record.errors),
            last_activity_ms: AtomicI64::new(0),
        }
    }

    /// Current processed count.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Current error count.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    /// Increment processed, returning the new value.
    pub fn record_processed(&self) -> u64 {
        self.touch();
        self.processed.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Increment errors, returning the new value.
    pub fn record_error(&self) -> u64 {
        self.touch();
        self.errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Most recent activity, when any.
    pub fn last_activity(&self) -> Option<chrono::DateTime<chrono::Local>> {
        match self.last_activity_ms.load(Ordering::Acquire) {
            0 => None,
            ms => chrono::DateTime::from_timestamp_millis(ms)
                .map(|utc| utc.with_timezone(&chrono::Local)),
        }
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(chrono::Local::now().timestamp_millis(), Ordering::Release);
    }
}

/// Restore counters for `name` and immediately re-flush them, so a
/// fresh stats file carries every configured channel.
pub fn restore_counters(stats: &StatsStore, name: &str) -> ChannelCounters {
    let record = stats.get(name);
    let counters = ChannelCounters::restore(record);
    stats.put_and_flush(name, record.processed, record.errors);
    debug!(
        channel = name,
        processed = record.processed,
        errors = record.errors,
        "restored channel counters"
    );
    counters
}
