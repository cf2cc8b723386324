//! Per-kind channel lifecycle managers.
//!
//! One [`Runtime`] instance per channel kind holds the loaded configs
//! and the running channels, keyed by name, under a manager-wide lock.
//! State transitions are explicit: a disabled config never starts, a
//! failed start leaves the channel stopped with the cause logged, and
//! `stop_all` always leaves the running map empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::inbound::InboundChannel;
use crate::outbound::OutboundChannel;
use crate::stats::{ChannelCounters, StatsStore};
use crate::transformer::TransformerRegistry;
use crate::translate::TranslateChannel;

/// The three channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// File-to-file transformation channels.
    Translate,
    /// MLLP listeners.
    Inbound,
    /// MLLP senders.
    Outbound,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChannelKind::Translate => "translate",
            ChannelKind::Inbound => "inbound",
            ChannelKind::Outbound => "outbound",
        })
    }
}

/// Lifecycle state of one configured channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Config present with `enabled: false`; terminal until reload.
    Disabled,
    /// Config present, not running.
    Stopped,
    /// Worker active.
    Running,
}

/// Snapshot row for the status surface; the GUI polls these.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: String,
    /// Which kind of channel.
    pub kind: ChannelKind,
    /// Current lifecycle state.
    pub state: ChannelState,
    /// Processed counter.
    pub processed: u64,
    /// Error counter.
    pub errors: u64,
    /// Input or source directory (save directory for inbound).
    pub dir: PathBuf,
    /// Most recent message activity, when running.
    pub last_activity: Option<DateTime<Local>>,
}

/// Shared dependencies handed to channels at start.
pub struct RuntimeDeps {
    /// Counter persistence, shared process-wide.
    pub stats: Arc<StatsStore>,
    /// Built-in transformer registry (translate channels only).
    pub registry: Arc<TransformerRegistry>,
}

/// Channel types a [`Runtime`] can manage.
#[async_trait]
pub trait ManagedChannel: Send + Sync + Sized + 'static {
    /// Config record for this kind.
    type Config: Clone + Send + Sync + 'static;

    /// Which kind this is.
    fn kind() -> ChannelKind;
    /// Channel name from a config.
    fn config_name(config: &Self::Config) -> &str;
    /// Enabled flag from a config.
    fn config_enabled(config: &Self::Config) -> bool;
    /// Input/source directory from a config.
    fn config_dir(config: &Self::Config) -> PathBuf;
    /// Scan the config subtree for this kind; per-file errors are
    /// logged inside and skip only the affected file.
    fn load_configs(channels_root: &Path) -> Vec<Self::Config>;
    /// Start one channel.
    async fn start_channel(config: Self::Config, deps: &RuntimeDeps) -> Result<Self>;
    /// Stop this channel (idempotent, never fails).
    async fn stop_channel(&self);
    /// Live counters.
    fn counters(&self) -> &Arc<ChannelCounters>;
}

struct State<C: ManagedChannel> {
    configs: HashMap<String, C::Config>,
    running: HashMap<String, C>,
}

/// Lifecycle manager for one channel kind.
pub struct Runtime<C: ManagedChannel> {
    state: Mutex<State<C>>,
    deps: RuntimeDeps,
}

/// Manager for translate channels.
pub type TranslateRuntime = Runtime<TranslateChannel>;
/// Manager for inbound channels.
pub type InboundRuntime = Runtime<InboundChannel>;
/// Manager for outbound channels.
pub type OutboundRuntime = Runtime<OutboundChannel>;

impl<C: ManagedChannel> Runtime<C> {
    /// New, empty manager.
    pub fn new(deps: RuntimeDeps) -> Self {
        Self {
            state: Mutex::new(State {
                configs: HashMap::new(),
                running: HashMap::new(),
            }),
            deps,
        }
    }

    /// Stop everything, rescan the config subtree, start every enabled
    /// channel. One channel failing to start never blocks the rest.
    pub async fn load_and_start(&self, channels_root: &Path) {
        let mut state = self.state.lock().await;
        stop_all_locked(&mut state).await;

        let configs = C::load_configs(channels_root);
        state.configs.clear();
        for config in configs {
            let name = C::config_name(&config).to_string();
            if state.configs.insert(name.clone(), config).is_some() {
                warn!(kind = %C::kind(), channel = %name, "duplicate channel name, later definition wins");
            }
        }
        info!(
            kind = %C::kind(),
            channels = state.configs.len(),
            root = %channels_root.display(),
            "configs loaded"
        );

        let names: Vec<String> = state.configs.keys().cloned().collect();
        for name in names {
            let config = state.configs[&name].clone();
            if !C::config_enabled(&config) {
                info!(kind = %C::kind(), channel = %name, "channel disabled, not starting");
                continue;
            }
            match C::start_channel(config, &self.deps).await {
                Ok(channel) => {
                    state.running.insert(name, channel);
                }
                Err(e) => {
                    error!(kind = %C::kind(), channel = %name, "failed to start channel: {e}");
                }
            }
        }
    }

    /// Start one channel by name; starting a running channel is a no-op.
    pub async fn start_channel(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.running.contains_key(name) {
            return Ok(());
        }
        let config = state
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| crate::error::ChannelError::UnknownChannel(name.to_string()))?;
        let channel = C::start_channel(config, &self.deps).await?;
        state.running.insert(name.to_string(), channel);
        Ok(())
    }

    /// Stop one channel by name; unknown names are a no-op.
    pub async fn stop_channel(&self, name: &str) {
        let mut state = self.state.lock().await;
        if let Some(channel) = state.running.remove(name) {
            channel.stop_channel().await;
        }
    }

    /// Best-effort stop of every running channel; the running map is
    /// empty afterwards.
    pub async fn stop_all(&self) {
        let mut state = self.state.lock().await;
        stop_all_locked(&mut state).await;
    }

    /// Names of currently running channels.
    pub async fn running_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.running.keys().cloned().collect()
    }

    /// Names of every configured channel.
    pub async fn all_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.configs.keys().cloned().collect()
    }

    /// Whether `name` is running.
    pub async fn is_running(&self, name: &str) -> bool {
        self.state.lock().await.running.contains_key(name)
    }

    /// Processed counter for `name`: live when running, persisted
    /// otherwise.
    pub async fn processed(&self, name: &str) -> u64 {
        let state = self.state.lock().await;
        match state.running.get(name) {
            Some(channel) => channel.counters().processed(),
            None => self.deps.stats.get(name).processed,
        }
    }

    /// Error counter for `name`: live when running, persisted otherwise.
    pub async fn errors(&self, name: &str) -> u64 {
        let state = self.state.lock().await;
        match state.running.get(name) {
            Some(channel) => channel.counters().errors(),
            None => self.deps.stats.get(name).errors,
        }
    }

    /// One status row per configured channel.
    pub async fn status(&self) -> Vec<ChannelStatus> {
        let state = self.state.lock().await;
        let mut rows: Vec<ChannelStatus> = state
            .configs
            .iter()
            .map(|(name, config)| {
                let running = state.running.get(name);
                let (channel_state, processed, errors, last_activity) = match running {
                    Some(channel) => {
                        let counters = channel.counters();
                        (
                            ChannelState::Running,
                            counters.processed(),
                            counters.errors(),
                            counters.last_activity(),
                        )
                    }
                    None => {
                        let record = self.deps.stats.get(name);
                        let channel_state = if C::config_enabled(config) {
                            ChannelState::Stopped
                        } else {
                            ChannelState::Disabled
                        };
                        (channel_state, record.processed, record.errors, None)
                    }
                };
                ChannelStatus {
                    name: name.clone(),
                    kind: C::kind(),
                    state: channel_state,
                    processed,
                    errors,
                    dir: C::config_dir(config),
                    last_activity,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}

async fn stop_all_locked<C: ManagedChannel>(state: &mut State<C>) {
    for (name, channel) in state.running.drain() {
        info!(kind = %C::kind(), channel = %name, "stopping channel");
        channel.stop_channel().await;
    }
}

#[async_trait]
impl ManagedChannel for TranslateChannel {
    type Config = channel_config::TranslateConfig;

    fn kind() -> ChannelKind {
        ChannelKind::Translate
    }

    fn config_name(config: &Self::Config) -> &str {
        &config.name
    }

    fn config_enabled(config: &Self::Config) -> bool {
        config.enabled
    }

    fn config_dir(config: &Self::Config) -> PathBuf {
        config.input_dir.clone()
    }

    fn load_configs(channels_root: &Path) -> Vec<Self::Config> {
        channel_config::load_translate_dir(channels_root).unwrap_or_else(|e| {
            error!("translate config scan failed: {e}");
            Vec::new()
        })
    }

    async fn start_channel(config: Self::Config, deps: &RuntimeDeps) -> Result<Self> {
        TranslateChannel::start(config, Arc::clone(&deps.stats), &deps.registry)
    }

    async fn stop_channel(&self) {
        self.stop().await;
    }

    fn counters(&self) -> &Arc<ChannelCounters> {
        TranslateChannel::counters(self)
    }
}

#[async_trait]
impl ManagedChannel for InboundChannel {
    type Config = channel_config::InboundConfig;

    fn kind() -> ChannelKind {
        ChannelKind::Inbound
    }

    fn config_name(config: &Self::Config) -> &str {
        &config.name
    }

    fn config_enabled(config: &Self::Config) -> bool {
        config.enabled
    }

    fn config_dir(config: &Self::Config) -> PathBuf {
        config.save_dir.clone()
    }

    fn load_configs(channels_root: &Path) -> Vec<Self::Config> {
        channel_config::load_inbound_dir(channels_root).unwrap_or_else(|e| {
            error!("inbound config scan failed: {e}");
            Vec::new()
        })
    }

    async fn start_channel(config: Self::Config, deps: &RuntimeDeps) -> Result<Self> {
        InboundChannel::start(config, Arc::clone(&deps.stats)).await
    }

    async fn stop_channel(&self) {
        self.stop().await;
    }

    fn counters(&self) -> &Arc<ChannelCounters> {
        InboundChannel::counters(self)
    }
}

#[async_trait]
impl ManagedChannel for OutboundChannel {
    type Config = channel_config::OutboundConfig;

    fn kind() -> ChannelKind {
        ChannelKind::Outbound
    }

    fn config_name(config: &Self::Config) -> &str {
        &config.name
    }

    fn config_enabled(config: &Self::Config) -> bool {
        config.enabled
    }

    fn config_dir(config: &Self::Config) -> PathBuf {
        config.source_dir.clone()
    }

    fn load_configs(channels_root: &Path) -> Vec<Self::Config> {
        channel_config::load_outbound_dir(channels_root).unwrap_or_else(|e| {
            error!("outbound config scan failed: {e}");
            Vec::new()
        })
    }

    async fn start_channel(config: Self::Config, deps: &RuntimeDeps) -> Result<Self> {
        OutboundChannel::start(config, Arc::clone(&deps.stats))
    }

    async fn stop_channel(&self) {
        self.stop().await;
    }

    fn counters(&self) -> &Arc<ChannelCounters> {
        OutboundChannel::counters(self)
    }
}
