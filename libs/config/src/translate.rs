//! Translate channel configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::{flex_bool, ConfigError, Result};

/// Floor applied to `pollIntervalMs`.
pub const MIN_POLL_INTERVAL_MS: u64 = 200;

/// File-to-file transformation channel.
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    /// Unique channel name within the translate kind.
    pub name: String,
    /// Disabled channels are loaded but never started.
    pub enabled: bool,
    /// Directory polled for input files.
    pub input_dir: PathBuf,
    /// Failed inputs move here (with a sidecar); deleted when unset.
    pub error_dir: Option<PathBuf>,
    /// Successful inputs move here when archiving is enabled.
    pub archive_dir: Option<PathBuf>,
    /// Ordered, non-empty destination directories.
    pub destinations: Vec<PathBuf>,
    /// Legacy single destination; mirrors `destinations[0]`.
    pub output_dir: Option<PathBuf>,
    /// Glob applied to input file names.
    pub input_pattern: String,
    /// Poll cadence in milliseconds (floored at 200).
    pub poll_interval_ms: u64,
    /// Maximum files consumed per poll tick.
    pub batch_size: usize,
    /// Transformer wiring.
    pub transformer: TransformerConfig,
    /// Retry and error-disposition policy.
    pub error_handling: ErrorHandlingConfig,
    /// Archive-on-success policy.
    pub archive: ArchiveConfig,
    /// YAML file this channel was loaded from; anchors relative script
    /// references.
    pub source_file: PathBuf,
}

/// Which transformer implementation a channel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerType {
    /// Script-driven WRAPI transformer.
    Wrapi,
    /// Built-in transformer resolved by `class` from the registry.
    /// The YAML accepts `native` or the legacy `java` spelling.
    Native,
}

/// Transformer section of a translate channel.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Implementation selector.
    pub kind: TransformerType,
    /// WRAPI script path, required for [`TransformerType::Wrapi`].
    pub script: Option<PathBuf>,
    /// Registered transformer name, required for [`TransformerType::Native`].
    pub class: Option<String>,
    /// Allow SET to create segments that are absent from the message.
    pub create_missing: bool,
    /// Parsed and carried; profile validation is not performed.
    pub validate_profile: bool,
}

/// Retry and error disposition policy.
#[derive(Debug, Clone)]
pub struct ErrorHandlingConfig {
    /// Retries of the read→transform→write-all unit after the first failure.
    pub retry_count: u32,
    /// Pause between attempts.
    pub retry_delay_ms: u64,
    /// Move failing inputs to the error directory.
    pub move_to_error: bool,
}

/// Archive-on-success policy.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// When false, successful inputs are deleted instead of archived.
    pub enabled: bool,
    /// Parsed and carried; compression is not performed.
    pub compress: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct RawTranslate {
    name: Option<String>,
    #[serde(deserialize_with = "flex_bool")]
    enabled: Option<bool>,
    #[serde(alias = "input-dir", alias = "input_dir")]
    input_dir: Option<PathBuf>,
    #[serde(alias = "output-dir", alias = "output_dir")]
    output_dir: Option<PathBuf>,
    #[serde(alias = "error-dir", alias = "error_dir")]
    error_dir: Option<PathBuf>,
    #[serde(alias = "archive-dir", alias = "archive_dir")]
    archive_dir: Option<PathBuf>,
    #[serde(alias = "input-pattern", alias = "input_pattern")]
    input_pattern: Option<String>,
    #[serde(alias = "poll-interval-ms", alias = "poll_interval_ms")]
    poll_interval_ms: Option<u64>,
    #[serde(alias = "batch-size", alias = "batch_size")]
    batch_size: Option<i64>,
    destinations: Option<Vec<DestinationEntry>>,
    transformer: Option<RawTransformer>,
    #[serde(alias = "error-handling", alias = "error_handling")]
    error_handling: Option<RawErrorHandling>,
    archive: Option<RawArchive>,
}

/// Destination list entries: `- /dir` shorthand or `- path: /dir`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DestinationEntry {
    Shorthand(PathBuf),
    Block { path: PathBuf },
}

impl DestinationEntry {
    fn into_path(self) -> PathBuf {
        match self {
            DestinationEntry::Shorthand(p) => p,
            DestinationEntry::Block { path } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawTransformer {
    #[serde(rename = "type")]
    kind: Option<String>,
    script: Option<PathBuf>,
    class: Option<String>,
    #[serde(
        alias = "create-missing",
        alias = "create_missing",
        deserialize_with = "flex_bool"
    )]
    create_missing: Option<bool>,
    #[serde(
        alias = "validate-profile",
        alias = "validate_profile",
        deserialize_with = "flex_bool"
    )]
    validate_profile: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawErrorHandling {
    #[serde(alias = "retry-count", alias = "retry_count")]
    retry_count: Option<i64>,
    #[serde(alias = "retry-delay-ms", alias = "retry_delay_ms")]
    retry_delay_ms: Option<u64>,
    #[serde(
        alias = "move-to-error",
        alias = "move_to_error",
        deserialize_with = "flex_bool"
    )]
    move_to_error: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawArchive {
    #[serde(deserialize_with = "flex_bool")]
    enabled: Option<bool>,
    #[serde(deserialize_with = "flex_bool")]
    compress: Option<bool>,
}

impl RawTranslate {
    pub(crate) fn finish(self, source: &Path) -> Result<TranslateConfig> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| crate::name_from_file(source));

        let input_dir = self.input_dir.ok_or(ConfigError::MissingField {
            path: source.to_path_buf(),
            field: "inputDir",
        })?;

        // Explicit destinations win; the legacy outputDir seeds the list
        // only when no list is given, and always mirrors the first entry.
        let mut destinations: Vec<PathBuf> = self
            .destinations
            .unwrap_or_default()
            .into_iter()
            .map(DestinationEntry::into_path)
            .collect();
        if destinations.is_empty() {
            if let Some(out) = &self.output_dir {
                destinations.push(out.clone());
            }
        }
        if destinations.is_empty() {
            return Err(ConfigError::MissingField {
                path: source.to_path_buf(),
                field: "destinations",
            });
        }
        let output_dir = Some(destinations[0].clone());

        let poll_interval_ms = match self.poll_interval_ms.unwrap_or(1000) {
            ms if ms < MIN_POLL_INTERVAL_MS => {
                warn!(
                    channel = %name,
                    requested = ms,
                    "pollIntervalMs below floor, using {MIN_POLL_INTERVAL_MS}"
                );
                MIN_POLL_INTERVAL_MS
            }
            ms => ms,
        };
        let batch_size = self.batch_size.unwrap_or(10).max(1) as usize;

        let transformer = self.transformer.unwrap_or_default();
        let kind = match transformer.kind.as_deref().unwrap_or("wrapi") {
            t if t.eq_ignore_ascii_case("wrapi") => TransformerType::Wrapi,
            t if t.eq_ignore_ascii_case("java") || t.eq_ignore_ascii_case("native") => {
                TransformerType::Native
            }
            other => {
                return Err(ConfigError::Invalid {
                    path: source.to_path_buf(),
                    detail: format!("unknown transformer type {other:?}"),
                })
            }
        };
        match kind {
            TransformerType::Wrapi if transformer.script.is_none() => {
                return Err(ConfigError::MissingField {
                    path: source.to_path_buf(),
                    field: "transformer.script",
                })
            }
            TransformerType::Native if transformer.class.is_none() => {
                return Err(ConfigError::MissingField {
                    path: source.to_path_buf(),
                    field: "transformer.class",
                })
            }
            _ => {}
        }

        let error_handling = self.error_handling.unwrap_or_default();
        let archive = self.archive.unwrap_or_default();

        Ok(TranslateConfig {
            name,
            enabled: self.enabled.unwrap_or(true),
            input_dir,
            error_dir: self.error_dir,
            archive_dir: self.archive_dir,
            destinations,
            output_dir,
            input_pattern: self
                .input_pattern
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "*.hl7".to_string()),
            poll_interval_ms,
            batch_size,
            transformer: TransformerConfig {
                kind,
                script: transformer.script,
                class: transformer.class,
                create_missing: transformer.create_missing.unwrap_or(true),
                validate_profile: transformer.validate_profile.unwrap_or(false),
            },
            error_handling: ErrorHandlingConfig {
                retry_count: error_handling.retry_count.unwrap_or(3).max(0) as u32,
                retry_delay_ms: error_handling.retry_delay_ms.unwrap_or(5000),
                move_to_error: error_handling.move_to_error.unwrap_or(true),
            },
            archive: ArchiveConfig {
                enabled: archive.enabled.unwrap_or(true),
                compress: archive.compress.unwrap_or(true),
            },
            source_file: source.to_path_buf(),
        })
    }
}
