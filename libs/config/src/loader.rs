//! Directory scanning and YAML document handling.
//!
//! Layout under the config root:
//!
//! ```text
//! conf/channels/*.yaml            translate channels
//! conf/channels/Inbound/*.yaml    inbound channels
//! conf/channels/Outbound/*.yaml   outbound channels
//! conf/transformers/*.wrapi       WRAPI scripts
//! ```
//!
//! A file that fails to parse disables only the channels it defines:
//! the error is logged and the remaining files load normally.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use tracing::{error, warn};

use crate::inbound::RawInbound;
use crate::outbound::RawOutbound;
use crate::translate::RawTranslate;
use crate::{ConfigError, InboundConfig, OutboundConfig, Result, TranslateConfig};

/// Subdirectory holding inbound channel YAML files.
pub const INBOUND_SUBDIR: &str = "Inbound";
/// Subdirectory holding outbound channel YAML files.
pub const OUTBOUND_SUBDIR: &str = "Outbound";

/// Load every translate channel defined directly under `channels_root`.
pub fn load_translate_dir(channels_root: &Path) -> Result<Vec<TranslateConfig>> {
    load_kind::<RawTranslate, _, _>(channels_root, |raw, path| raw.finish(path))
}

/// Load every inbound channel under `channels_root/Inbound`, creating
/// the subdirectory when absent.
pub fn load_inbound_dir(channels_root: &Path) -> Result<Vec<InboundConfig>> {
    let dir = ensure_subdir(channels_root, INBOUND_SUBDIR)?;
    load_kind::<RawInbound, _, _>(&dir, |raw, path| raw.finish(path))
}

/// Load every outbound channel under `channels_root/Outbound`, creating
/// the subdirectory when absent.
pub fn load_outbound_dir(channels_root: &Path) -> Result<Vec<OutboundConfig>> {
    let dir = ensure_subdir(channels_root, OUTBOUND_SUBDIR)?;
    load_kind::<RawOutbound, _, _>(&dir, |raw, path| raw.finish(path))
}

/// Resolve a WRAPI script reference: the YAML directory first, then the
/// sibling `transformers/` directory, then the working directory.
pub fn resolve_script(script: &Path, yaml_dir: &Path) -> Option<PathBuf> {
    if script.is_absolute() {
        return script.exists().then(|| script.to_path_buf());
    }

    let mut candidates = vec![yaml_dir.join(script)];
    if let Some(conf_root) = yaml_dir.parent() {
        candidates.push(conf_root.join("transformers").join(script));
    }
    candidates.push(script.to_path_buf());

    candidates.into_iter().find(|c| c.is_file())
}

fn ensure_subdir(channels_root: &Path, name: &str) -> Result<PathBuf> {
    let dir = channels_root.join(name);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(dir)
}

fn load_kind<R, F, C>(dir: &Path, finish: F) -> Result<Vec<C>>
where
    R: DeserializeOwned,
    F: Fn(R, &Path) -> Result<C>,
{
    let mut configs = Vec::new();
    for path in yaml_files(dir)? {
        let docs = match documents(&path) {
            Ok(docs) => docs,
            Err(e) => {
                error!("skipping channel file: {e}");
                continue;
            }
        };
        for doc in docs {
            let raw: R = match serde_yaml::from_value(doc) {
                Ok(raw) => raw,
                Err(source) => {
                    error!(
                        "skipping channel in {}: {}",
                        path.display(),
                        ConfigError::Yaml {
                            path: path.clone(),
                            source
                        }
                    );
                    continue;
                }
            };
            match finish(raw, &path) {
                Ok(config) => configs.push(config),
                Err(e) => error!("skipping channel: {e}"),
            }
        }
    }
    Ok(configs)
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Read one YAML file into channel mappings.
///
/// Accepts a single mapping, a list of mappings, or mappings wrapped
/// under a top-level `channel:` key.
fn documents(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let root: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let items = match root {
        Value::Null => Vec::new(),
        Value::Sequence(seq) => seq,
        other => vec![other],
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Mapping(mut map) => {
                let wrapped = map.remove(&Value::String("channel".to_string()));
                match wrapped {
                    Some(inner @ Value::Mapping(_)) => Some(inner),
                    Some(_) | None if !map.is_empty() => Some(Value::Mapping(map)),
                    _ => None,
                }
            }
            other => {
                warn!("skipping non-mapping entry in {}: {other:?}", path.display());
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransformerType;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn translate_kebab_case_with_wrapper_and_destinations() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "adt.yaml",
            r#"
channel:
  name: ADT-Cleanup
  enabled: yes
  input-dir: /data/in
  error-dir: /data/err
  archive-dir: /data/arch
  input-pattern: "*.hl7"
  poll-interval-ms: 500
  batch-size: 5
  destinations:
    - path: /data/out/a
    - /data/out/b
  transformer:
    type: wrapi
    script: adt_cleanup.wrapi
    create-missing: no
  error-handling:
    retry-count: 2
    retry-delay-ms: 100
    move-to-error: true
  archive:
    enabled: true
    compress: false
"#,
        );

        let configs = load_translate_dir(tmp.path()).unwrap();
        assert_eq!(configs.len(), 1);
        let c = &configs[0];
        assert_eq!(c.name, "ADT-Cleanup");
        assert!(c.enabled);
        assert_eq!(c.input_dir, PathBuf::from("/data/in"));
        assert_eq!(
            c.destinations,
            vec![PathBuf::from("/data/out/a"), PathBuf::from("/data/out/b")]
        );
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("/data/out/a")));
        assert_eq!(c.poll_interval_ms, 500);
        assert_eq!(c.batch_size, 5);
        assert_eq!(c.transformer.kind, TransformerType::Wrapi);
        assert!(!c.transformer.create_missing);
        assert_eq!(c.error_handling.retry_count, 2);
        assert_eq!(c.error_handling.retry_delay_ms, 100);
        assert!(c.archive.enabled);
        assert!(!c.archive.compress);
    }

    #[test]
    fn translate_camel_case_with_legacy_output_dir() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "legacy.yaml",
            r#"
name: Legacy
inputDir: /in
outputDir: /out
transformer:
  type: wrapi
  script: s.wrapi
"#,
        );

        let configs = load_translate_dir(tmp.path()).unwrap();
        let c = &configs[0];
        assert_eq!(c.destinations, vec![PathBuf::from("/out")]);
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("/out")));
        // Defaults fill everything else in.
        assert_eq!(c.input_pattern, "*.hl7");
        assert_eq!(c.poll_interval_ms, 1000);
        assert_eq!(c.batch_size, 10);
        assert!(c.transformer.create_missing);
        assert_eq!(c.error_handling.retry_count, 3);
        assert!(c.archive.enabled);
    }

    #[test]
    fn explicit_destinations_win_over_output_dir() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "both.yaml",
            r#"
name: Both
inputDir: /in
outputDir: /legacy
destinations:
  - /a
  - /b
transformer: { type: wrapi, script: s.wrapi }
"#,
        );

        let c = &load_translate_dir(tmp.path()).unwrap()[0];
        assert_eq!(c.destinations, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("/a")));
    }

    #[test]
    fn translate_poll_interval_is_floored() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "fast.yaml",
            "name: F\ninputDir: /in\noutputDir: /out\npollIntervalMs: 50\ntransformer: { type: wrapi, script: s.wrapi }\n",
        );
        let c = &load_translate_dir(tmp.path()).unwrap()[0];
        assert_eq!(c.poll_interval_ms, 200);
    }

    #[test]
    fn translate_without_input_dir_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "bad.yaml", "name: Bad\noutputDir: /out\n");
        write(
            tmp.path(),
            "good.yaml",
            "name: Good\ninputDir: /in\noutputDir: /out\ntransformer: { type: wrapi, script: s.wrapi }\n",
        );
        let configs = load_translate_dir(tmp.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "Good");
    }

    #[test]
    fn native_transformer_requires_class() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "nat.yaml",
            "name: N\ninputDir: /in\noutputDir: /out\ntransformer: { type: java, class: AdtCleanup }\n",
        );
        let c = &load_translate_dir(tmp.path()).unwrap()[0];
        assert_eq!(c.transformer.kind, TransformerType::Native);
        assert_eq!(c.transformer.class.as_deref(), Some("AdtCleanup"));

        let tmp2 = TempDir::new().unwrap();
        write(
            tmp2.path(),
            "nat.yaml",
            "name: N\ninputDir: /in\noutputDir: /out\ntransformer: { type: java }\n",
        );
        assert!(load_translate_dir(tmp2.path()).unwrap().is_empty());
    }

    #[test]
    fn inbound_loads_and_validates_port() {
        let tmp = TempDir::new().unwrap();
        let inbound = tmp.path().join(INBOUND_SUBDIR);
        fs::create_dir_all(&inbound).unwrap();
        write(
            &inbound,
            "rx.yaml",
            "- name: RX1\n  port: 12575\n  saveDir: /tmp/rx\n  filePrefix: ADT_\n- name: RX2\n  port: 99999\n  saveDir: /tmp/rx2\n",
        );

        let configs = load_inbound_dir(tmp.path()).unwrap();
        // RX2 has an out-of-range port and is skipped.
        assert_eq!(configs.len(), 1);
        let c = &configs[0];
        assert_eq!(c.name, "RX1");
        assert_eq!(c.port, 12575);
        assert_eq!(c.file_prefix, "ADT_");
        assert_eq!(c.file_suffix, ".hl7");
        assert!(c.auto_ack);
    }

    #[test]
    fn inbound_requires_save_dir() {
        let tmp = TempDir::new().unwrap();
        let inbound = tmp.path().join(INBOUND_SUBDIR);
        fs::create_dir_all(&inbound).unwrap();
        write(&inbound, "rx.yaml", "name: RX\nport: 2575\n");
        assert!(load_inbound_dir(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn inbound_subdir_is_created_when_missing() {
        let tmp = TempDir::new().unwrap();
        assert!(load_inbound_dir(tmp.path()).unwrap().is_empty());
        assert!(tmp.path().join(INBOUND_SUBDIR).is_dir());
    }

    #[test]
    fn outbound_defaults() {
        let tmp = TempDir::new().unwrap();
        let outbound = tmp.path().join(OUTBOUND_SUBDIR);
        fs::create_dir_all(&outbound).unwrap();
        write(
            &outbound,
            "tx.yaml",
            "name: TX1\nhost: hl7.example.org\nport: 2576\nsourceDir: /outbox\nwaitForAck: no\n",
        );

        let c = &load_outbound_dir(tmp.path()).unwrap()[0];
        assert_eq!(c.name, "TX1");
        assert_eq!(c.host, "hl7.example.org");
        assert_eq!(c.port, 2576);
        assert!(!c.wait_for_ack);
        assert_eq!(c.pattern, "*.hl7");
        assert_eq!(c.connect_timeout_ms, 5000);
        assert_eq!(c.read_timeout_ms, 5000);
        assert_eq!(c.poll_interval_ms, 1000);
        assert_eq!(c.concurrent_sends, 1);
        assert!(c.error_dir.is_none());
    }

    #[test]
    fn name_defaults_to_file_stem() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "lab-feed.yml",
            "inputDir: /in\noutputDir: /out\ntransformer: { type: wrapi, script: s.wrapi }\n",
        );
        let c = &load_translate_dir(tmp.path()).unwrap()[0];
        assert_eq!(c.name, "lab-feed");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "extra.yaml",
            "name: E\ninputDir: /in\noutputDir: /out\ncolor: purple\ntransformer: { type: wrapi, script: s.wrapi, flavor: mild }\n",
        );
        assert_eq!(load_translate_dir(tmp.path()).unwrap().len(), 1);
    }

    #[test]
    fn script_resolution_order() {
        let tmp = TempDir::new().unwrap();
        let conf = tmp.path().join("conf");
        let channels = conf.join("channels");
        let transformers = conf.join("transformers");
        fs::create_dir_all(&channels).unwrap();
        fs::create_dir_all(&transformers).unwrap();

        let script = Path::new("clean.wrapi");
        assert!(resolve_script(script, &channels).is_none());

        fs::write(transformers.join("clean.wrapi"), "SAVE\n").unwrap();
        assert_eq!(
            resolve_script(script, &channels).unwrap(),
            transformers.join("clean.wrapi")
        );

        // A copy next to the YAML wins over the transformers directory.
        fs::write(channels.join("clean.wrapi"), "SAVE\n").unwrap();
        assert_eq!(
            resolve_script(script, &channels).unwrap(),
            channels.join("clean.wrapi")
        );

        let absolute = transformers.join("clean.wrapi");
        assert_eq!(resolve_script(&absolute, &channels).unwrap(), absolute);
    }
}
