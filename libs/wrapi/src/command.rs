//! Command execution against a parsed message.
//!
//! SET and COPY go through the structured field accessors; the
//! remaining edits splice the encoded text and re-parse.

use hl7::{FieldPath, Message};
use tracing::warn;

use crate::{Result, WrapiError};

/// One parsed WRAPI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SET <SEG>-<n> "<literal>"`: set field `n` in every occurrence.
    Set {
        /// Target path; the occurrence, when present, pins one segment.
        path: FieldPath,
        /// Literal to write.
        value: String,
    },
    /// `COPY <from> -> <to>`: best-effort field copy.
    Copy {
        /// Source path.
        from: FieldPath,
        /// Destination path.
        to: FieldPath,
    },
    /// `CLEAR <SEG>-<n>`: blank the field in all occurrences.
    Clear {
        /// Segment ID.
        segment: String,
        /// 1-based HL7 field number.
        field: u32,
    },
    /// `DELSEG <SEG>`: drop every matching segment.
    DelSeg {
        /// Segment ID.
        segment: String,
    },
    /// `TRUNC <SEG> , <n>`: keep the first `n` occurrences.
    TruncSegments {
        /// Segment ID.
        segment: String,
        /// Occurrences to keep.
        keep: usize,
    },
    /// `TRUNC <SEG>-<f> , <n>`: keep the first `n` repetitions of a field.
    TruncRepetitions {
        /// Segment ID.
        segment: String,
        /// 1-based HL7 field number.
        field: u32,
        /// Repetitions to keep.
        keep: usize,
    },
    /// `ADDSEG [after <SEG>] "<segText>"`: dedupe then insert once.
    AddSeg {
        /// Anchor segment; `None` appends at the end of the message.
        after: Option<String>,
        /// Exact encoded segment line to insert.
        line: String,
    },
    /// `SAVE`: terminal marker, operationally a no-op.
    Save,
}

impl Command {
    /// Apply this command, returning the (possibly re-parsed) message.
    pub fn apply(&self, msg: Message, create_missing: bool) -> Result<Message> {
        match self {
            Command::Set { path, value } => apply_set(msg, path, value, create_missing),
            Command::Copy { from, to } => Ok(apply_copy(msg, from, to)),
            Command::Clear { segment, field } => {
                splice(msg, self, |lines, sep| clear_field(lines, sep, segment, *field))
            }
            Command::DelSeg { segment } => {
                splice(msg, self, |lines, _| delete_segments(lines, segment))
            }
            Command::TruncSegments { segment, keep } => {
                splice(msg, self, |lines, _| trunc_segments(lines, segment, *keep))
            }
            Command::TruncRepetitions {
                segment,
                field,
                keep,
            } => splice(msg, self, |lines, sep| {
                trunc_repetitions(lines, sep, segment, *field, *keep)
            }),
            Command::AddSeg { after, line } => splice(msg, self, |lines, sep| {
                add_segment(lines, sep, after.as_deref(), line)
            }),
            Command::Save => Ok(msg),
        }
    }

    fn describe(&self) -> String {
        match self {
            Command::Set { path, .. } => format!("SET {path}"),
            Command::Copy { from, to } => format!("COPY {from} -> {to}"),
            Command::Clear { segment, field } => format!("CLEAR {segment}-{field}"),
            Command::DelSeg { segment } => format!("DELSEG {segment}"),
            Command::TruncSegments { segment, keep } => format!("TRUNC {segment},{keep}"),
            Command::TruncRepetitions {
                segment,
                field,
                keep,
            } => format!("TRUNC {segment}-{field},{keep}"),
            Command::AddSeg { .. } => "ADDSEG".to_string(),
            Command::Save => "SAVE".to_string(),
        }
    }
}

fn apply_set(
    mut msg: Message,
    path: &FieldPath,
    value: &str,
    create_missing: bool,
) -> Result<Message> {
    let wrap = |source| WrapiError::Command {
        command: format!("SET {path}"),
        source,
    };

    if let Some(_occ) = path.occurrence {
        msg.set(path, value).map_err(wrap)?;
        return Ok(msg);
    }

    let occurrences = msg.occurrence_count(&path.segment);
    if occurrences == 0 {
        if create_missing {
            msg.append_segment(&path.segment);
            msg.set(path, value).map_err(wrap)?;
        }
        return Ok(msg);
    }
    for occ in 0..occurrences {
        msg.set(&path.clone().with_occurrence(occ), value)
            .map_err(wrap)?;
    }
    Ok(msg)
}

fn apply_copy(mut msg: Message, from: &FieldPath, to: &FieldPath) -> Message {
    // COPY never aborts and never creates structure.
    let Some(value) = msg.get(from) else {
        warn!(%from, "COPY skipped: source path not found or unreadable");
        return msg;
    };
    if let Err(e) = msg.set(to, &value) {
        warn!(%to, error = %e, "COPY skipped: destination path not writable");
    }
    msg
}

/// Wire-level separators as seen on the encoded text.
fn wire_separators(lines: &[String]) -> (char, char) {
    let mut field = '|';
    let mut repetition = '~';
    if let Some(msh) = lines.first().filter(|l| l.starts_with("MSH") && l.len() >= 4) {
        field = msh.chars().nth(3).unwrap_or('|');
        if let Some(encoding) = msh.split(field).nth(1) {
            if let Some(r) = encoding.chars().nth(1) {
                repetition = r;
            }
        }
    }
    (field, repetition)
}

fn segment_id_matches(line: &str, id: &str) -> bool {
    line.len() >= 3 && line[..3].eq_ignore_ascii_case(id)
}

/// Maps a 1-based HL7 field number onto a split-token index for a line.
///
/// MSH field 1 is the separator itself: no token, `None`.
fn wire_token_index(line: &str, field: u32) -> Option<usize> {
    if line[..3].eq_ignore_ascii_case("MSH") {
        if field <= 1 {
            None
        } else {
            Some(field as usize - 1)
        }
    } else {
        Some(field as usize)
    }
}

/// Encode, run a line-level edit, re-parse.
fn splice<F>(msg: Message, cmd: &Command, edit: F) -> Result<Message>
where
    F: FnOnce(Vec<String>, (char, char)) -> Vec<String>,
{
    let text = msg.encode();
    let lines: Vec<String> = text
        .split('\r')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let sep = wire_separators(&lines);

    let edited = edit(lines, sep);
    let mut out = edited.join("\r");
    out.push('\r');

    Message::parse(&out).map_err(|source| WrapiError::Command {
        command: cmd.describe(),
        source,
    })
}

fn clear_field(lines: Vec<String>, sep: (char, char), segment: &str, field: u32) -> Vec<String> {
    let (fsep, _) = sep;
    lines
        .into_iter()
        .map(|line| {
            if !segment_id_matches(&line, segment) {
                return line;
            }
            let Some(idx) = wire_token_index(&line, field) else {
                // MSH-1 is the separator char itself; nothing to clear.
                return line;
            };
            let mut tokens: Vec<&str> = line.split(fsep).collect();
            if idx < tokens.len() {
                tokens[idx] = "";
            }
            tokens.join(&fsep.to_string())
        })
        .collect()
}

fn delete_segments(lines: Vec<String>, segment: &str) -> Vec<String> {
    lines
        .into_iter()
        .filter(|line| !segment_id_matches(line, segment))
        .collect()
}

fn trunc_segments(lines: Vec<String>, segment: &str, keep: usize) -> Vec<String> {
    let mut seen = 0usize;
    lines
        .into_iter()
        .filter(|line| {
            if segment_id_matches(line, segment) {
                seen += 1;
                seen <= keep
            } else {
                true
            }
        })
        .collect()
}

fn trunc_repetitions(
    lines: Vec<String>,
    sep: (char, char),
    segment: &str,
    field: u32,
    keep: usize,
) -> Vec<String> {
    let (fsep, rsep) = sep;
    lines
        .into_iter()
        .map(|line| {
            if !segment_id_matches(&line, segment) {
                return line;
            }
            let Some(idx) = wire_token_index(&line, field) else {
                return line;
            };
            let mut tokens: Vec<String> = line.split(fsep).map(str::to_string).collect();
            if let Some(token) = tokens.get_mut(idx) {
                if token.contains(rsep) {
                    let reps: Vec<&str> = token.split(rsep).collect();
                    if reps.len() > keep {
                        *token = reps[..keep].join(&rsep.to_string());
                    }
                }
            }
            tokens.join(&fsep.to_string())
        })
        .collect()
}

fn add_segment(
    mut lines: Vec<String>,
    sep: (char, char),
    after: Option<&str>,
    seg_text: &str,
) -> Vec<String> {
    let (fsep, _) = sep;

    // Global dedupe first: every prior copy of the exact line goes away,
    // so re-running the script cannot accumulate duplicates.
    lines.retain(|line| line != seg_text);

    match after {
        None => lines.push(seg_text.to_string()),
        Some(anchor) => {
            let anchor_idx = lines.iter().position(|line| {
                segment_id_matches(line, anchor)
                    && (line.len() == 3 || line.chars().nth(3) == Some(fsep))
            });
            match anchor_idx {
                Some(i) => lines.insert(i + 1, seg_text.to_string()),
                // Anchor not present: skip silently.
                None => {}
            }
        }
    }
    lines
}
