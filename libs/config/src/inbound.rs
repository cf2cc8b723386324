//! Inbound (MLLP listener) channel configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{flex_bool, validate_port, ConfigError, Result};

/// MLLP listener that persists received messages to a directory.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    /// Unique channel name within the inbound kind.
    pub name: String,
    /// Disabled channels are loaded but never started.
    pub enabled: bool,
    /// TCP listen port, `1..=65535`.
    pub port: u16,
    /// Directory for received payloads; created at channel start.
    pub save_dir: PathBuf,
    /// Prepended to saved file names.
    pub file_prefix: String,
    /// Appended to saved file names.
    pub file_suffix: String,
    /// Every connection is acknowledged; always true.
    pub auto_ack: bool,
    /// Free-text note carried for the status surface.
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct RawInbound {
    name: Option<String>,
    #[serde(deserialize_with = "flex_bool")]
    enabled: Option<bool>,
    port: Option<i64>,
    #[serde(alias = "save-dir", alias = "save_dir")]
    save_dir: Option<PathBuf>,
    #[serde(alias = "file-prefix", alias = "file_prefix")]
    file_prefix: Option<String>,
    #[serde(alias = "file-suffix", alias = "file_suffix")]
    file_suffix: Option<String>,
    description: Option<String>,
}

impl RawInbound {
    pub(crate) fn finish(self, source: &Path) -> Result<InboundConfig> {
        let port = validate_port(source, self.port)?;

        let save_dir = self
            .save_dir
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or(ConfigError::MissingField {
                path: source.to_path_buf(),
                field: "saveDir",
            })?;

        Ok(InboundConfig {
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| crate::name_from_file(source)),
            enabled: self.enabled.unwrap_or(true),
            port,
            save_dir,
            file_prefix: self.file_prefix.unwrap_or_default(),
            file_suffix: self.file_suffix.unwrap_or_else(|| ".hl7".to_string()),
            auto_ack: true,
            description: self.description.unwrap_or_default(),
        })
    }
}
