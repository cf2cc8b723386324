//! Inbound channel: MLLP listener that persists each received message
//! and always answers with exactly one ACK.
//!
//! Every accepted connection gets its own task. When the payload
//! parses, the ACK is generated from the message itself; otherwise a
//! textual fallback ACK goes out, so a client never waits in vain.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use channel_config::InboundConfig;
use hl7::ack::{extract_control_id, fallback_ack, AckReason};
use hl7::Message;
use mllp::{FrameReader, MllpError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::STOP_GRACE;
use crate::error::{ChannelError, Result};
use crate::stats::{restore_counters, ChannelCounters, StatsStore};

/// Deadline for reading one frame from an accepted connection.
const FRAME_DEADLINE: Duration = Duration::from_secs(30);

/// A running inbound listener channel.
pub struct InboundChannel {
    name: String,
    save_dir: PathBuf,
    local_addr: SocketAddr,
    counters: Arc<ChannelCounters>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InboundChannel {
    /// Create the save directory, bind the listener and spawn the
    /// accept loop. A bind failure is fatal for this channel only.
    pub async fn start(config: InboundConfig, stats: Arc<StatsStore>) -> Result<Self> {
        std::fs::create_dir_all(&config.save_dir)?;

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| ChannelError::Bind {
                channel: config.name.clone(),
                port: config.port,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let counters = Arc::new(restore_counters(&stats, &config.name));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let name = config.name.clone();
        let save_dir = config.save_dir.clone();
        let shared = Arc::new(Shared {
            config,
            counters: Arc::clone(&counters),
            running: Arc::clone(&running),
            stats,
        });
        let handle = tokio::spawn(accept_loop(
            listener,
            shared,
            Arc::clone(&shutdown),
        ));

        info!(channel = %name, addr = %local_addr, "inbound channel listening");
        Ok(Self {
            name,
            save_dir,
            local_addr,
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

    /// Where received payloads are persisted.
    pub fn save_dir(&self) -> &std::path::Path {
        &self.save_dir
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live counters.
    pub fn counters(&self) -> &Arc<ChannelCounters> {
        &self.counters
    }

    /// Close the listener; in-flight connection handlers finish on
    /// their own. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(channel = %self.name, "stopping inbound channel");
        self.shutdown.notify_waiters();
        if let Some(mut handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!(channel = %self.name, "accept loop did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

struct Shared {
    config: InboundConfig,
    counters: Arc<ChannelCounters>,
    running: Arc<AtomicBool>,
    stats: Arc<StatsStore>,
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(channel = %shared.config.name, %peer, "inbound connection accepted");
                    tokio::spawn(handle_connection(Arc::clone(&shared), stream, peer));
                }
                Err(e) => {
                    if !shared.running.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(channel = %shared.config.name, "accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
    info!(channel = %shared.config.name, "inbound listener closed");
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let channel = shared.config.name.as_str();
    let mut reader = FrameReader::new(stream);

    let frame = match reader.read_frame(FRAME_DEADLINE).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!(channel, %peer, "connection closed without a frame");
            return;
        }
        Err(e) => {
            let errors = shared.counters.record_error();
            shared
                .stats
                .put_and_flush(channel, shared.counters.processed(), errors);
            warn!(channel, %peer, "frame read failed: {e}");
            // The socket may still be writable after a timeout; no
            // payload arrived, so acknowledge as empty.
            if !matches!(e, MllpError::Io(_)) {
                send_ack(&mut reader, &fallback_ack("", AckReason::Empty), channel, peer).await;
            }
            return;
        }
    };

    if frame.is_empty() {
        // Client protocol quirk, not an engine failure: no counter moves.
        warn!(channel, %peer, "empty MLLP frame, sending fallback ACK");
        send_ack(&mut reader, &fallback_ack("", AckReason::Empty), channel, peer).await;
        return;
    }

    let saved = persist_payload(&shared.config, &frame);
    let saved_path = match saved {
        Ok(path) => path,
        Err(e) => {
            let errors = shared.counters.record_error();
            shared
                .stats
                .put_and_flush(channel, shared.counters.processed(), errors);
            error!(channel, %peer, "failed persisting payload: {e}");
            let control_id = std::str::from_utf8(&frame)
                .map(extract_control_id)
                .unwrap_or_default();
            send_ack(
                &mut reader,
                &fallback_ack(&control_id, AckReason::ParseFail),
                channel,
                peer,
            )
            .await;
            return;
        }
    };

    let ack_text = match std::str::from_utf8(&frame) {
        Ok(text) => match Message::parse(text).and_then(|m| m.generate_ack()) {
            Ok(ack) => ack.encode(),
            Err(e) => {
                warn!(channel, %peer, "cannot generate ACK, falling back: {e}");
                fallback_ack(&extract_control_id(text), AckReason::ParseFail)
            }
        },
        Err(_) => {
            warn!(channel, %peer, "payload is not UTF-8, falling back");
            fallback_ack("", AckReason::ParseFail)
        }
    };

    if mllp::write_frame(reader.get_mut(), ack_text.as_bytes())
        .await
        .is_ok()
    {
        let processed = shared.counters.record_processed();
        shared
            .stats
            .put_and_flush(channel, processed, shared.counters.errors());
        debug!(
            channel,
            %peer,
            file = %saved_path.display(),
            processed,
            "message received and acknowledged"
        );
    } else {
        let errors = shared.counters.record_error();
        shared
            .stats
            .put_and_flush(channel, shared.counters.processed(), errors);
        warn!(channel, %peer, "failed writing ACK");
    }
}

async fn send_ack(
    reader: &mut FrameReader<TcpStream>,
    ack: &str,
    channel: &str,
    peer: SocketAddr,
) {
    if let Err(e) = mllp::write_frame(reader.get_mut(), ack.as_bytes()).await {
        debug!(channel, %peer, "fallback ACK not delivered: {e}");
    }
}

/// Write the raw payload to
/// `<saveDir>/<prefix><yyyyMMdd_HHmmss_SSS><suffix>`; on a name clash a
/// monotonic `_<n>` suffix disambiguates.
fn persist_payload(config: &InboundConfig, payload: &[u8]) -> std::io::Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
    let base = format!("{}{stamp}", config.file_prefix);

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{base}{}", config.file_suffix)
        } else {
            format!("{base}_{attempt}{}", config.file_suffix)
        };
        let path = config.save_dir.join(name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(payload)?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}
