//! Outbound (MLLP sender) channel configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{flex_bool, validate_port, ConfigError, Result};

/// Directory poller that delivers each file over MLLP.
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    /// Unique channel name within the outbound kind.
    pub name: String,
    /// Disabled channels are loaded but never started.
    pub enabled: bool,
    /// Remote MLLP host.
    pub host: String,
    /// Remote MLLP port, `1..=65535`.
    pub port: u16,
    /// Directory polled for files to send.
    pub source_dir: PathBuf,
    /// Glob applied to source file names.
    pub pattern: String,
    /// Wait for a framed ACK after each send.
    pub wait_for_ack: bool,
    /// TCP connect deadline.
    pub connect_timeout_ms: u64,
    /// Deadline for reading the ACK frame.
    pub read_timeout_ms: u64,
    /// Poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Failed files move here (with a sidecar); left in place when unset.
    pub error_dir: Option<PathBuf>,
    /// Sent files move here; deleted when unset.
    pub archive_dir: Option<PathBuf>,
    /// Sender workers per channel.
    pub concurrent_sends: usize,
    /// Free-text note carried for the status surface.
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct RawOutbound {
    name: Option<String>,
    #[serde(deserialize_with = "flex_bool")]
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<i64>,
    #[serde(alias = "source-dir", alias = "source_dir")]
    source_dir: Option<PathBuf>,
    pattern: Option<String>,
    #[serde(
        alias = "wait-for-ack",
        alias = "wait_for_ack",
        deserialize_with = "flex_bool"
    )]
    wait_for_ack: Option<bool>,
    #[serde(alias = "connect-timeout-ms", alias = "connect_timeout_ms")]
    connect_timeout_ms: Option<u64>,
    #[serde(alias = "read-timeout-ms", alias = "read_timeout_ms")]
    read_timeout_ms: Option<u64>,
    #[serde(alias = "poll-interval-ms", alias = "poll_interval_ms")]
    poll_interval_ms: Option<u64>,
    #[serde(alias = "error-dir", alias = "error_dir")]
    error_dir: Option<PathBuf>,
    #[serde(alias = "archive-dir", alias = "archive_dir")]
    archive_dir: Option<PathBuf>,
    #[serde(alias = "concurrent-sends", alias = "concurrent_sends")]
    concurrent_sends: Option<i64>,
    description: Option<String>,
}

impl RawOutbound {
    pub(crate) fn finish(self, source: &Path) -> Result<OutboundConfig> {
        let port = validate_port(source, self.port)?;

        let source_dir = self
            .source_dir
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or(ConfigError::MissingField {
                path: source.to_path_buf(),
                field: "sourceDir",
            })?;

        Ok(OutboundConfig {
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| crate::name_from_file(source)),
            enabled: self.enabled.unwrap_or(true),
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            source_dir,
            pattern: self
                .pattern
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "*.hl7".to_string()),
            wait_for_ack: self.wait_for_ack.unwrap_or(true),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(5000),
            read_timeout_ms: self.read_timeout_ms.unwrap_or(5000),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(1000),
            error_dir: self.error_dir,
            archive_dir: self.archive_dir,
            concurrent_sends: self.concurrent_sends.unwrap_or(1).max(1) as usize,
            description: self.description.unwrap_or_default(),
        })
    }
}
