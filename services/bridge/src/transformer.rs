//! Transformer seam and registry.
//!
//! A translate channel owns exactly one [`Transformer`]. `type: wrapi`
//! loads a script from disk; `type: native` (legacy spelling `java`)
//! resolves `class` against the process-wide [`TransformerRegistry`] of
//! built-in transformers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use channel_config::{resolve_script, TransformerType, TranslateConfig};
use chrono::{DateTime, Local};
use hl7::Message;
use tracing::debug;
use wrapi::Script;

use crate::error::{ChannelError, Result};

/// Per-message context handed to transformers.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Name of the channel running the transform.
    pub channel_name: String,
    /// File name of the input, without directories.
    pub original_filename: String,
    /// Full path of the input file.
    pub input_path: PathBuf,
    /// When the file was picked up.
    pub received_at: DateTime<Local>,
}

/// One message in, one message out.
pub trait Transformer: Send + Sync {
    /// Transform `message`; an error fails the current file only.
    fn transform(&self, message: Message, ctx: &TransformContext) -> Result<Message>;
}

/// Script-backed transformer; the script is parsed once at channel start.
pub struct WrapiTransformer {
    script: Script,
    create_missing: bool,
}

impl WrapiTransformer {
    /// Load and parse the script at `path`.
    pub fn load(path: &Path, create_missing: bool) -> Result<Self> {
        let script = Script::from_file(path)?;
        debug!(
            script = %path.display(),
            commands = script.commands().len(),
            "loaded WRAPI script"
        );
        Ok(Self {
            script,
            create_missing,
        })
    }
}

impl Transformer for WrapiTransformer {
    fn transform(&self, message: Message, _ctx: &TransformContext) -> Result<Message> {
        Ok(self.script.apply(message, self.create_missing)?)
    }
}

/// Bundled ADT cleanup: strips insurance/procedure/allergy segments,
/// pins the receiving identity, redacts patient demographics and stamps
/// the message as processed.
const ADT_CLEANUP: &str = r#"
DELSEG IN1
DELSEG IN2
DELSEG PR1
DELSEG AL1
SET MSH-4 "MAIN_HOSPITAL"
SET MSH-6 "PRIMARY_SYSTEM"
SET MSH-12 "2.2"
CLEAR PID-5
CLEAR PID-6
CLEAR PID-7
CLEAR PID-8
TRUNC PID-13, 2
ADDSEG after PID "NTE|1|PROCESSED|ADT_CLEANUP"
ADDSEG "ZXT|1|PROCESSED|ADT_CLEANUP"
SAVE
"#;

/// Named built-in transformers available to `type: native` channels.
pub struct TransformerRegistry {
    entries: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Registry pre-populated with the bundled transformers.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };
        let adt_cleanup = Script::parse(ADT_CLEANUP).expect("bundled script parses");
        registry.register(
            "AdtCleanup",
            Arc::new(WrapiTransformer {
                script: adt_cleanup,
                create_missing: true,
            }),
        );
        registry
    }

    /// Register a transformer under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &str, transformer: Arc<dyn Transformer>) {
        self.entries.insert(name.to_string(), transformer);
    }

    /// Look up a registered transformer.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.entries.get(name).cloned()
    }
}

/// Build the transformer a translate channel is configured with.
///
/// Script references resolve against the channel's YAML directory,
/// then the sibling `transformers/` directory, then the working
/// directory. Failures here are fatal for the channel start.
pub fn create_transformer(
    config: &TranslateConfig,
    registry: &TransformerRegistry,
) -> Result<Arc<dyn Transformer>> {
    let channel = config.name.clone();
    match config.transformer.kind {
        TransformerType::Wrapi => {
            let script_ref =
                config
                    .transformer
                    .script
                    .as_deref()
                    .ok_or_else(|| ChannelError::Config {
                        channel: channel.clone(),
                        detail: "wrapi transformer without a script".to_string(),
                    })?;
            let yaml_dir = config
                .source_file
                .parent()
                .unwrap_or_else(|| Path::new("."));
            let script_path =
                resolve_script(script_ref, yaml_dir).ok_or_else(|| ChannelError::Config {
                    channel: channel.clone(),
                    detail: format!("WRAPI script not found: {}", script_ref.display()),
                })?;
            Ok(Arc::new(WrapiTransformer::load(
                &script_path,
                config.transformer.create_missing,
            )?))
        }
        TransformerType::Native => {
            let class = config
                .transformer
                .class
                .as_deref()
                .ok_or_else(|| ChannelError::Config {
                    channel: channel.clone(),
                    detail: "native transformer without a class".to_string(),
                })?;
            registry.get(class).ok_or_else(|| ChannelError::Config {
                channel,
                detail: format!("no registered transformer named {class:?}"),
            })
        }
    }
}
