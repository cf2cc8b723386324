//! Shared plumbing for the three channel kinds: cancelable sleeps,
//! directory scans and file disposition.

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::GlobMatcher;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::ChannelError;

/// Join grace before a stopping channel's worker is aborted.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Sleep that wakes early when the channel is told to stop.
pub async fn cancellable_sleep(shutdown: &Notify, ms: u64) {
    tokio::select! {
        _ = shutdown.notified() => {}
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
    }
}

/// Regular files in `dir` whose names match `matcher`, in enumeration
/// order, at most `limit`. A missing or unreadable directory yields
/// nothing.
pub fn scan_matching_files(dir: &Path, matcher: &GlobMatcher, limit: usize) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        if matcher.is_match(name) {
            files.push(path);
            if files.len() >= limit {
                break;
            }
        }
    }
    files
}

/// What to do with a failed input when no error directory is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingErrorDir {
    /// Delete the input (translate channels).
    DeleteInput,
    /// Log and leave the input where it is (outbound channels).
    LeaveInput,
}

/// Error disposition: write the `.error.txt` sidecar, then move the
/// input into the error directory, replacing any previous occupant.
///
/// Failures moving the file are logged; as a last resort the input
/// stays where it is.
pub fn dispose_error(
    error_dir: Option<&Path>,
    on_missing: MissingErrorDir,
    channel: &str,
    input: &Path,
    err: &ChannelError,
) {
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let Some(error_dir) = error_dir else {
        match on_missing {
            MissingErrorDir::DeleteInput => {
                if let Err(e) = std::fs::remove_file(input) {
                    error!(channel, file = %file_name, "failed deleting errored file: {e}");
                }
            }
            MissingErrorDir::LeaveInput => {
                warn!(channel, file = %file_name, "error dir not configured; leaving failed file in place");
            }
        }
        return;
    };

    if let Err(e) = std::fs::create_dir_all(error_dir) {
        error!(channel, dir = %error_dir.display(), "cannot create error dir: {e}");
        return;
    }

    let sidecar = error_dir.join(format!("{file_name}.error.txt"));
    let body = format!(
        "Channel: {channel}\nFile   : {file_name}\nWhen   : {}\nError  : {} - {err}\n",
        chrono::Local::now().to_rfc3339(),
        err.kind(),
    );
    if let Err(e) = std::fs::write(&sidecar, body) {
        error!(channel, file = %sidecar.display(), "failed writing error sidecar: {e}");
    }

    if let Err(e) = move_replace(input, &error_dir.join(&file_name)) {
        error!(channel, file = %file_name, "failed moving errored file: {e}");
    }
}

/// Success disposition: move the input into the archive directory, or
/// delete it when archiving is off. Failures are logged and the input
/// stays put.
pub fn finish_success(archive_dir: Option<&Path>, channel: &str, input: &Path) {
    match archive_dir {
        Some(dir) => {
            let target = dir.join(input.file_name().unwrap_or_default());
            let moved = std::fs::create_dir_all(dir).and_then(|_| move_replace(input, &target));
            if let Err(e) = moved {
                warn!(channel, file = %input.display(), "post-success archive failed: {e}");
            } else {
                debug!(channel, file = %target.display(), "archived input");
            }
        }
        None => {
            if let Err(e) = std::fs::remove_file(input) {
                warn!(channel, file = %input.display(), "post-success delete failed: {e}");
            }
        }
    }
}

/// Rename with replace semantics, falling back to copy+delete when the
/// rename crosses filesystems.
pub fn move_replace(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::Glob;
    use tempfile::TempDir;

    fn matcher(pattern: &str) -> GlobMatcher {
        Glob::new(pattern).unwrap().compile_matcher()
    }

    #[test]
    fn scan_respects_pattern_and_limit() {
        let tmp = TempDir::new().unwrap();
        for name in ["a.hl7", "b.hl7", "c.txt", "d.hl7"] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("sub.hl7")).unwrap();

        let all = scan_matching_files(tmp.path(), &matcher("*.hl7"), usize::MAX);
        assert_eq!(all.len(), 3);

        let limited = scan_matching_files(tmp.path(), &matcher("*.hl7"), 2);
        assert_eq!(limited.len(), 2);

        let none = scan_matching_files(&tmp.path().join("missing"), &matcher("*.hl7"), 10);
        assert!(none.is_empty());
    }

    #[test]
    fn dispose_writes_sidecar_and_moves() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("bad.hl7");
        std::fs::write(&input, "MSH|x").unwrap();
        let error_dir = tmp.path().join("err");

        dispose_error(
            Some(&error_dir),
            MissingErrorDir::DeleteInput,
            "CH1",
            &input,
            &ChannelError::EmptyFile,
        );

        assert!(!input.exists());
        assert!(error_dir.join("bad.hl7").exists());
        let sidecar = std::fs::read_to_string(error_dir.join("bad.hl7.error.txt")).unwrap();
        assert!(sidecar.contains("Channel: CH1"));
        assert!(sidecar.contains("EmptyFile"));
    }

    #[test]
    fn dispose_without_error_dir_honors_policy() {
        let tmp = TempDir::new().unwrap();

        let deleted = tmp.path().join("del.hl7");
        std::fs::write(&deleted, "x").unwrap();
        dispose_error(
            None,
            MissingErrorDir::DeleteInput,
            "CH",
            &deleted,
            &ChannelError::EmptyFile,
        );
        assert!(!deleted.exists());

        let left = tmp.path().join("keep.hl7");
        std::fs::write(&left, "x").unwrap();
        dispose_error(
            None,
            MissingErrorDir::LeaveInput,
            "CH",
            &left,
            &ChannelError::EmptyFile,
        );
        assert!(left.exists());
    }

    #[test]
    fn success_archives_or_deletes() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("ok.hl7");
        std::fs::write(&input, "x").unwrap();
        let archive = tmp.path().join("arch");

        finish_success(Some(&archive), "CH", &input);
        assert!(!input.exists());
        assert!(archive.join("ok.hl7").exists());

        let input2 = tmp.path().join("ok2.hl7");
        std::fs::write(&input2, "x").unwrap();
        finish_success(None, "CH", &input2);
        assert!(!input2.exists());
    }
}
