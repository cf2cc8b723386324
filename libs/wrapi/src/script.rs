//! Script parsing: one command per line, terminated by the first SAVE.

use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use hl7::{FieldPath, Message};
use regex::Regex;

use crate::command::Command;
use crate::{Result, WrapiError};

/// A parsed, immutable WRAPI script.
///
/// Parsed once at channel start; [`apply`](Script::apply) runs it
/// against each message.
#[derive(Debug, Clone)]
pub struct Script {
    commands: Vec<Command>,
}

struct Grammar {
    set: Regex,
    copy: Regex,
    clear: Regex,
    delseg: Regex,
    trunc: Regex,
    addseg_after: Regex,
    addseg_append: Regex,
}

fn grammar() -> &'static Grammar {
    static G: OnceLock<Grammar> = OnceLock::new();
    G.get_or_init(|| Grammar {
        set: Regex::new(r#"(?s)^([A-Za-z0-9()-]+)\s+"(.*)"$"#).unwrap(),
        copy: Regex::new(r"^([A-Za-z0-9()-]+)\s+->\s+([A-Za-z0-9()-]+)$").unwrap(),
        clear: Regex::new(r"^([A-Za-z]{3})-(\d+)$").unwrap(),
        delseg: Regex::new(r"^[A-Za-z][A-Za-z0-9]{2}$").unwrap(),
        trunc: Regex::new(r"^([A-Za-z0-9-]+)\s*,\s*(\d+)$").unwrap(),
        addseg_after: Regex::new(r#"(?si)^after\s+([A-Za-z][A-Za-z0-9]{2})\s+"(.*)"$"#).unwrap(),
        addseg_append: Regex::new(r#"(?s)^"(.*)"$"#).unwrap(),
    })
}

impl Script {
    /// Parse script text. Blank lines and `#` comments are skipped;
    /// everything after the first `SAVE` is ignored.
    pub fn parse(source: &str) -> Result<Self> {
        let mut commands = Vec::new();

        for (idx, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let command = parse_line(line, idx + 1)?;
            let is_save = command == Command::Save;
            commands.push(command);
            if is_save {
                break;
            }
        }

        Ok(Self { commands })
    }

    /// Read and parse a script file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| WrapiError::ScriptIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    /// Run every command in order against `msg`.
    pub fn apply(&self, msg: Message, create_missing: bool) -> Result<Message> {
        let mut current = msg;
        for command in &self.commands {
            current = command.apply(current, create_missing)?;
        }
        Ok(current)
    }

    /// The parsed command sequence.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<Command> {
    let syntax = |detail: String| WrapiError::Syntax {
        line: line_no,
        detail,
    };

    let upper = line.to_ascii_uppercase();
    if upper == "SAVE" {
        return Ok(Command::Save);
    }

    let (keyword, args) = match line.split_once(char::is_whitespace) {
        Some((k, rest)) => (k.to_ascii_uppercase(), rest.trim()),
        None => return Err(syntax(format!("unknown command {line:?}"))),
    };
    let g = grammar();

    match keyword.as_str() {
        "SET" => {
            let caps = g
                .set
                .captures(args)
                .ok_or_else(|| syntax(format!("invalid SET syntax: {args}")))?;
            let path = parse_path(&caps[1], line_no)?;
            if path.field.is_none() {
                return Err(syntax(format!("SET requires a field path: {}", &caps[1])));
            }
            Ok(Command::Set {
                path,
                value: unescape(&caps[2]),
            })
        }
        "COPY" => {
            let caps = g
                .copy
                .captures(args)
                .ok_or_else(|| syntax(format!("invalid COPY syntax: {args}")))?;
            Ok(Command::Copy {
                from: parse_path(&caps[1], line_no)?,
                to: parse_path(&caps[2], line_no)?,
            })
        }
        "CLEAR" => {
            let caps = g
                .clear
                .captures(args)
                .ok_or_else(|| syntax(format!("CLEAR only supports SEG-<field>: {args}")))?;
            let field: u32 = caps[2]
                .parse()
                .map_err(|_| syntax(format!("invalid field number: {}", &caps[2])))?;
            if field < 1 {
                return Err(syntax(format!("field number must be >= 1: {args}")));
            }
            Ok(Command::Clear {
                segment: caps[1].to_ascii_uppercase(),
                field,
            })
        }
        "DELSEG" => {
            if !g.delseg.is_match(args) {
                return Err(syntax(format!("invalid DELSEG syntax: {args}")));
            }
            Ok(Command::DelSeg {
                segment: args.to_ascii_uppercase(),
            })
        }
        "TRUNC" => {
            let caps = g
                .trunc
                .captures(args)
                .ok_or_else(|| syntax(format!("invalid TRUNC syntax: {args}")))?;
            let keep: usize = caps[2]
                .parse()
                .map_err(|_| syntax(format!("invalid TRUNC count: {}", &caps[2])))?;
            if keep < 1 {
                return Err(syntax("TRUNC count must be >= 1".to_string()));
            }
            let target = &caps[1];
            match target.split_once('-') {
                Some((seg, field)) => {
                    let field: u32 = field
                        .parse()
                        .map_err(|_| syntax(format!("invalid field number in TRUNC: {field}")))?;
                    Ok(Command::TruncRepetitions {
                        segment: seg.to_ascii_uppercase(),
                        field,
                        keep,
                    })
                }
                None => {
                    if !g.delseg.is_match(target) {
                        return Err(syntax(format!("invalid TRUNC segment: {target}")));
                    }
                    Ok(Command::TruncSegments {
                        segment: target.to_ascii_uppercase(),
                        keep,
                    })
                }
            }
        }
        "ADDSEG" => {
            if let Some(caps) = g.addseg_after.captures(args) {
                return Ok(Command::AddSeg {
                    after: Some(caps[1].to_ascii_uppercase()),
                    line: unescape(&caps[2]),
                });
            }
            if let Some(caps) = g.addseg_append.captures(args) {
                return Ok(Command::AddSeg {
                    after: None,
                    line: unescape(&caps[1]),
                });
            }
            Err(syntax(format!("invalid ADDSEG syntax: {args}")))
        }
        other => Err(syntax(format!("unknown command {other:?}"))),
    }
}

fn parse_path(s: &str, line_no: usize) -> Result<FieldPath> {
    FieldPath::from_str(s).map_err(|_| WrapiError::Syntax {
        line: line_no,
        detail: format!("invalid field path: {s}"),
    })
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"")
        .replace("\\\\", "\\")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
# adt cleanup
DELSEG IN1
CLEAR PID-5
TRUNC PID-13,2
ADDSEG after PID "NTE|1|OK"
ADDSEG "ZXT|1|OK"
SAVE
CLEAR PID-3
"#;

    const INPUT: &str = "MSH|^~\\&|S|F|D|F|20250101||ADT^A01|M1|P|2.5\rPID|1||A||LAST^FIRST||||||||555-1^^^~555-2^^^~555-3^^^\rIN1|1|X\r";

    #[test]
    fn parses_pipeline_and_stops_at_save() {
        let script = Script::parse(PIPELINE).unwrap();
        // DELSEG, CLEAR, TRUNC, ADDSEG x2, SAVE; the trailing CLEAR is ignored.
        assert_eq!(script.commands().len(), 6);
        assert_eq!(script.commands()[5], Command::Save);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let script = Script::parse("delseg in1\nclear pid-5\nsave\n").unwrap();
        assert_eq!(
            script.commands()[0],
            Command::DelSeg {
                segment: "IN1".into()
            }
        );
        assert_eq!(script.commands().len(), 3);
    }

    #[test]
    fn trunc_tolerates_spaces_around_comma() {
        let script = Script::parse("TRUNC OBX , 3\nTRUNC PID-13 ,1\n").unwrap();
        assert_eq!(
            script.commands()[0],
            Command::TruncSegments {
                segment: "OBX".into(),
                keep: 3
            }
        );
        assert_eq!(
            script.commands()[1],
            Command::TruncRepetitions {
                segment: "PID".into(),
                field: 13,
                keep: 1
            }
        );
    }

    #[test]
    fn set_unescapes_quoted_literal() {
        let script = Script::parse(r#"SET PID-5 "DOE\"J\\R""#).unwrap();
        assert_eq!(
            script.commands()[0],
            Command::Set {
                path: "PID-5".parse().unwrap(),
                value: r#"DOE"J\R"#.into(),
            }
        );
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = Script::parse("DELSEG IN1\nBOGUS X\n").unwrap_err();
        match err {
            WrapiError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("expected syntax error, got {other}"),
        }

        let err = Script::parse("SET PID-5 no-quotes\n").unwrap_err();
        assert!(matches!(err, WrapiError::Syntax { line: 1, .. }));
    }

    #[test]
    fn executes_cleanup_pipeline() {
        let script = Script::parse(PIPELINE).unwrap();
        let out = script
            .apply(Message::parse(INPUT).unwrap(), true)
            .unwrap();
        let text = out.encode();

        assert_eq!(out.occurrence_count("IN1"), 0);
        assert_eq!(out.get(&"PID-5".parse().unwrap()).as_deref(), Some(""));
        assert_eq!(
            out.get(&"PID-13".parse().unwrap()).as_deref(),
            Some("555-1^^^~555-2^^^")
        );
        assert_eq!(text.matches("NTE|1|OK\r").count(), 1);
        assert_eq!(text.matches("ZXT|1|OK\r").count(), 1);
        assert!(text.ends_with("ZXT|1|OK\r"));
    }

    #[test]
    fn pipeline_is_idempotent_on_its_own_output() {
        let script = Script::parse(PIPELINE).unwrap();
        let once = script
            .apply(Message::parse(INPUT).unwrap(), true)
            .unwrap();
        let twice = script.apply(once.clone(), true).unwrap();

        let text = twice.encode();
        assert_eq!(text.matches("NTE|1|OK\r").count(), 1);
        assert_eq!(text.matches("ZXT|1|OK\r").count(), 1);
        assert_eq!(once.encode(), text);
    }

    #[test]
    fn copy_round_trip_through_script() {
        let script = Script::parse("COPY PID-5-1 -> PID-6\nSAVE\n").unwrap();
        let out = script
            .apply(Message::parse(INPUT).unwrap(), false)
            .unwrap();
        assert_eq!(out.get(&"PID-6".parse().unwrap()).as_deref(), Some("LAST"));
    }
}
