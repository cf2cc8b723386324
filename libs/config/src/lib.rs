//! Channel configuration records and their YAML loaders.
//!
//! Three channel kinds, three config records: [`TranslateConfig`],
//! [`InboundConfig`], [`OutboundConfig`]. YAML keys are accepted in
//! both camelCase and kebab-case spellings; booleans additionally
//! accept `yes`/`no`; unknown keys are ignored. A YAML file may hold a
//! single mapping, a list of mappings, or a mapping wrapped under a
//! top-level `channel:` key.

pub mod inbound;
pub mod loader;
pub mod outbound;
pub mod translate;

pub use inbound::InboundConfig;
pub use loader::{
    load_inbound_dir, load_outbound_dir, load_translate_dir, resolve_script, INBOUND_SUBDIR,
    OUTBOUND_SUBDIR,
};
pub use outbound::OutboundConfig;
pub use translate::{
    ArchiveConfig, ErrorHandlingConfig, TransformerConfig, TransformerType, TranslateConfig,
};

use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Result type alias for config loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that make a channel configuration unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file or directory could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML or does not match the schema.
    #[error("invalid YAML in {}: {source}", .path.display())]
    Yaml {
        /// Offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A required key is absent.
    #[error("{}: missing required field `{field}`", .path.display())]
    MissingField {
        /// Offending file.
        path: PathBuf,
        /// The absent key.
        field: &'static str,
    },

    /// A port is outside `1..=65535`.
    #[error("{}: invalid port {port}", .path.display())]
    InvalidPort {
        /// Offending file.
        path: PathBuf,
        /// The out-of-range value.
        port: i64,
    },

    /// Any other per-channel constraint violation.
    #[error("{}: {detail}", .path.display())]
    Invalid {
        /// Offending file.
        path: PathBuf,
        /// What was wrong.
        detail: String,
    },
}

/// Boolean accepting `true`/`false`/`yes`/`no`, case-insensitive.
pub(crate) fn flex_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Bool(b)) => Ok(Some(b)),
        Some(Raw::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(Some(true)),
            "false" | "no" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean value: {other:?}"
            ))),
        },
    }
}

pub(crate) fn validate_port(path: &std::path::Path, port: Option<i64>) -> Result<u16> {
    let value = port.ok_or(ConfigError::MissingField {
        path: path.to_path_buf(),
        field: "port",
    })?;
    if (1..=65535).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ConfigError::InvalidPort {
            path: path.to_path_buf(),
            port: value,
        })
    }
}

/// Default channel name: the config file's stem.
pub(crate) fn name_from_file(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "channel".to_string())
}
