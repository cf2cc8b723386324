//! Outbound channel: poll a source directory and deliver each file as
//! one framed MLLP message, optionally waiting for an ACK.
//!
//! A poll task feeds a small worker pool (`concurrentSends`, default
//! 1). A file is dispatched to exactly one worker per observation; an
//! in-flight set keeps later poll ticks from double-sending a file
//! whose delivery is still running.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use channel_config::OutboundConfig;
use globset::Glob;
use mllp::MllpClient;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::common::{
    cancellable_sleep, dispose_error, finish_success, scan_matching_files, MissingErrorDir,
    STOP_GRACE,
};
use crate::error::{ChannelError, Result};
use crate::stats::{restore_counters, ChannelCounters, StatsStore};

/// A running outbound sender channel.
pub struct OutboundChannel {
    name: String,
    source_dir: PathBuf,
    counters: Arc<ChannelCounters>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    poller: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OutboundChannel {
    /// Create the working directories, restore counters and spawn the
    /// poll task plus sender workers.
    pub fn start(config: OutboundConfig, stats: Arc<StatsStore>) -> Result<Self> {
        std::fs::create_dir_all(&config.source_dir)?;
        for dir in [&config.error_dir, &config.archive_dir].into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
        let matcher = Glob::new(&config.pattern)
            .map_err(|source| ChannelError::Pattern {
                pattern: config.pattern.clone(),
                source,
            })?
            .compile_matcher();

        let counters = Arc::new(restore_counters(&stats, &config.name));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let (tx, rx) = mpsc::channel::<PathBuf>(64);
        let rx = Arc::new(Mutex::new(rx));
        let in_flight: Arc<parking_lot::Mutex<HashSet<PathBuf>>> =
            Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let sender = Arc::new(Sender {
            config: config.clone(),
            counters: Arc::clone(&counters),
            stats,
            in_flight: Arc::clone(&in_flight),
        });

        let mut workers = Vec::with_capacity(config.concurrent_sends);
        for worker_id in 0..config.concurrent_sends {
            let sender = Arc::clone(&sender);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    match next {
                        Some(file) => sender.deliver(&file, worker_id).await,
                        None => break,
                    }
                }
            }));
        }

        let name = config.name.clone();
        let source_dir = config.source_dir.clone();
        let poller = tokio::spawn(poll_loop(
            config,
            matcher,
            tx,
            in_flight,
            Arc::clone(&running),
            Arc::clone(&shutdown),
        ));

        info!(channel = %name, source = %source_dir.display(), "outbound channel started");
        Ok(Self {
            name,
            source_dir,
            counters,
            running,
            shutdown,
            poller: Mutex::new(Some(poller)),
            workers: Mutex::new(workers),
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory this channel polls.
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Live counters.
    pub fn counters(&self) -> &Arc<ChannelCounters> {
        &self.counters
    }

    /// Stop polling, let workers drain, abort stragglers after the
    /// grace period. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(channel = %self.name, "stopping outbound channel");
        self.shutdown.notify_waiters();

        if let Some(mut poller) = self.poller.lock().await.take() {
            if tokio::time::timeout(STOP_GRACE, &mut poller).await.is_err() {
                warn!(channel = %self.name, "poller did not stop in time, aborting");
                poller.abort();
            }
        }
        // The poller owned the queue sender; once it is gone the
        // workers drain the queue and exit.
        let mut workers = self.workers.lock().await;
        for mut worker in workers.drain(..) {
            if tokio::time::timeout(STOP_GRACE, &mut worker).await.is_err() {
                warn!(channel = %self.name, "sender did not stop in time, aborting");
                worker.abort();
            }
        }
    }
}

async fn poll_loop(
    config: OutboundConfig,
    matcher: globset::GlobMatcher,
    tx: mpsc::Sender<PathBuf>,
    in_flight: Arc<parking_lot::Mutex<HashSet<PathBuf>>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    while running.load(Ordering::Acquire) {
        cancellable_sleep(&shutdown, config.poll_interval_ms).await;
        if !running.load(Ordering::Acquire) {
            break;
        }

        let files = scan_matching_files(&config.source_dir, &matcher, usize::MAX);
        for file in files {
            if !running.load(Ordering::Acquire) {
                break;
            }
            if !in_flight.lock().insert(file.clone()) {
                continue;
            }
            if tx.send(file).await.is_err() {
                return;
            }
        }
    }
    info!(channel = %config.name, "outbound poller stopped");
}

struct Sender {
    config: OutboundConfig,
    counters: Arc<ChannelCounters>,
    stats: Arc<StatsStore>,
    in_flight: Arc<parking_lot::Mutex<HashSet<PathBuf>>>,
}

impl Sender {
    async fn deliver(&self, file: &Path, worker_id: usize) {
        let channel = self.config.name.as_str();
        match self.try_send(file).await {
            Ok(bytes) => {
                finish_success(self.config.archive_dir.as_deref(), channel, file);
                let processed = self.counters.record_processed();
                self.stats
                    .put_and_flush(channel, processed, self.counters.errors());
                info!(
                    channel,
                    worker = worker_id,
                    file = %file.display(),
                    bytes,
                    target = %format!("{}:{}", self.config.host, self.config.port),
                    "delivered"
                );
            }
            Err(e) => {
                let errors = self.counters.record_error();
                self.stats
                    .put_and_flush(channel, self.counters.processed(), errors);
                error!(
                    channel,
                    file = %file.display(),
                    target = %format!("{}:{}", self.config.host, self.config.port),
                    "send failed: {e}"
                );
                dispose_error(
                    self.config.error_dir.as_deref(),
                    MissingErrorDir::LeaveInput,
                    channel,
                    file,
                    &e,
                );
            }
        }
        self.in_flight.lock().remove(file);
    }

    async fn try_send(&self, file: &Path) -> Result<usize> {
        let payload = std::fs::read(file)?;
        if payload.is_empty() {
            return Err(ChannelError::EmptyFile);
        }

        let mut client = MllpClient::connect(
            format!("{}:{}", self.config.host, self.config.port),
            Duration::from_millis(self.config.connect_timeout_ms),
            Duration::from_millis(self.config.read_timeout_ms),
        )
        .await?;
        client.send(&payload).await?;

        if self.config.wait_for_ack {
            // Any well-framed reply counts as acceptance; it is not parsed.
            match client.read_reply().await? {
                Some(_) => {}
                None => return Err(ChannelError::NoAck),
            }
        }
        Ok(payload.len())
    }
}
