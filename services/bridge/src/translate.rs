//! Translate channel: poll a directory, transform each HL7 file,
//! fan the result out to every destination.
//!
//! Side effects per input file happen in a fixed order: destination
//! writes (list order, staged then committed), then archive or delete,
//! then counter update and flush. When any destination fails the whole
//! file fails as a unit and no partial copies survive.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use channel_config::TranslateConfig;
use globset::{Glob, GlobMatcher};
use hl7::Message;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::{
    cancellable_sleep, dispose_error, finish_success, scan_matching_files, MissingErrorDir,
    STOP_GRACE,
};
use crate::error::{ChannelError, Result};
use crate::stats::{restore_counters, ChannelCounters, StatsStore};
use crate::transformer::{create_transformer, TransformContext, Transformer, TransformerRegistry};

/// A running translate channel.
pub struct TranslateChannel {
    name: String,
    input_dir: PathBuf,
    counters: Arc<ChannelCounters>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TranslateChannel {
    /// Build the transformer, restore counters and spawn the poll loop.
    ///
    /// Script load failures and bad globs fail the start; the channel
    /// stays stopped and the cause is returned.
    pub fn start(
        config: TranslateConfig,
        stats: Arc<StatsStore>,
        registry: &TransformerRegistry,
    ) -> Result<Self> {
        let transformer = create_transformer(&config, registry)?;
        let matcher = Glob::new(&config.input_pattern)
            .map_err(|source| ChannelError::Pattern {
                pattern: config.input_pattern.clone(),
                source,
            })?
            .compile_matcher();

        let counters = Arc::new(restore_counters(&stats, &config.name));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let name = config.name.clone();
        let input_dir = config.input_dir.clone();
        let worker = Worker {
            config,
            transformer,
            matcher,
            counters: Arc::clone(&counters),
            running: Arc::clone(&running),
            shutdown: Arc::clone(&shutdown),
            stats,
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            name,
            input_dir,
            counters,
            running,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory this channel polls.
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Live counters.
    pub fn counters(&self) -> &Arc<ChannelCounters> {
        &self.counters
    }

    /// Stop the poll loop; the worker exits after the current file, or
    /// is aborted once the grace period runs out. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(channel = %self.name, "stopping translate channel");
        self.shutdown.notify_waiters();
        if let Some(mut handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!(channel = %self.name, "worker did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

struct Worker {
    config: TranslateConfig,
    transformer: Arc<dyn Transformer>,
    matcher: GlobMatcher,
    counters: Arc<ChannelCounters>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    stats: Arc<StatsStore>,
}

impl Worker {
    async fn run(self) {
        info!(
            channel = %self.config.name,
            input = %self.config.input_dir.display(),
            destinations = self.config.destinations.len(),
            "translate channel started"
        );
        while self.running.load(Ordering::Acquire) {
            cancellable_sleep(&self.shutdown, self.config.poll_interval_ms).await;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.poll_tick().await;
        }
        info!(channel = %self.config.name, "translate channel stopped");
    }

    async fn poll_tick(&self) {
        let files = scan_matching_files(
            &self.config.input_dir,
            &self.matcher,
            self.config.batch_size,
        );
        for file in files {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.process_with_retry(&file).await;
        }
    }

    /// Retries cover the read→transform→write-all unit; the archive
    /// step and counters run once, after the unit settles.
    async fn process_with_retry(&self, file: &Path) {
        let retries = self.config.error_handling.retry_count;
        let mut attempt = 0u32;
        loop {
            match self.process_once(file) {
                Ok(()) => {
                    let archive_dir = if self.config.archive.enabled {
                        self.config.archive_dir.as_deref()
                    } else {
                        None
                    };
                    finish_success(archive_dir, &self.config.name, file);
                    let processed = self.counters.record_processed();
                    self.stats.put_and_flush(
                        &self.config.name,
                        processed,
                        self.counters.errors(),
                    );
                    debug!(
                        channel = %self.config.name,
                        file = %file.display(),
                        processed,
                        "processed input"
                    );
                    return;
                }
                Err(e) if attempt < retries && self.running.load(Ordering::Acquire) => {
                    attempt += 1;
                    warn!(
                        channel = %self.config.name,
                        file = %file.display(),
                        attempt,
                        retries,
                        "attempt failed, retrying: {e}"
                    );
                    cancellable_sleep(&self.shutdown, self.config.error_handling.retry_delay_ms)
                        .await;
                }
                Err(e) => {
                    self.fail(file, e);
                    return;
                }
            }
        }
    }

    fn process_once(&self, file: &Path) -> Result<()> {
        let raw = std::fs::read(file)?;
        let text = String::from_utf8(raw).map_err(|_| ChannelError::NotUtf8)?;
        let message = Message::parse(&text)?;

        let original_filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ctx = TransformContext {
            channel_name: self.config.name.clone(),
            original_filename: original_filename.clone(),
            input_path: file.to_path_buf(),
            received_at: chrono::Local::now(),
        };

        let transformed = self.transformer.transform(message, &ctx)?;
        let encoded = transformed.encode();

        self.write_all_destinations(&original_filename, &encoded)
    }

    /// Stage a temp copy in every destination, then commit with
    /// renames. Any failure rolls back everything already written so a
    /// failed file leaves no partial outputs behind.
    fn write_all_destinations(&self, file_name: &str, encoded: &str) -> Result<()> {
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for dest in &self.config.destinations {
            match stage_write(dest, file_name, encoded) {
                Ok(pair) => staged.push(pair),
                Err(e) => failures.push(format!("{}: {e}", dest.display())),
            }
        }

        if failures.is_empty() {
            for (temp, target) in &staged {
                if let Err(e) = std::fs::rename(temp, target) {
                    failures.push(format!("{}: {e}", target.display()));
                }
            }
        }

        if !failures.is_empty() {
            for (temp, target) in &staged {
                let _ = std::fs::remove_file(temp);
                let _ = std::fs::remove_file(target);
            }
            return Err(ChannelError::DestinationWrite { failures });
        }
        Ok(())
    }

    fn fail(&self, file: &Path, err: ChannelError) {
        let errors = self.counters.record_error();
        self.stats
            .put_and_flush(&self.config.name, self.counters.processed(), errors);
        error!(
            channel = %self.config.name,
            file = %file.display(),
            errors,
            "processing failed: {err}"
        );

        let error_dir = if self.config.error_handling.move_to_error {
            self.config.error_dir.as_deref()
        } else {
            None
        };
        dispose_error(
            error_dir,
            MissingErrorDir::DeleteInput,
            &self.config.name,
            file,
            &err,
        );
    }
}

fn stage_write(dest: &Path, file_name: &str, contents: &str) -> std::io::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dest)?;
    let target = dest.join(file_name);
    let temp = dest.join(format!(".{file_name}.tmp"));
    std::fs::write(&temp, contents)?;
    Ok((temp, target))
}
