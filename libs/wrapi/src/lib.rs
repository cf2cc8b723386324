//! WRAPI, a line-oriented micro-DSL for HL7 edits.
//!
//! A script is a sequence of commands, one per line. Blank lines and
//! `#` comments are skipped; the first `SAVE` terminates the script.
//! Keywords are case-insensitive, operands case-preserving.
//!
//! ```text
//! # strip insurance, blank the patient name, cap phone repetitions
//! DELSEG IN1
//! CLEAR PID-5
//! TRUNC PID-13, 2
//! ADDSEG after PID "NTE|1|OK"
//! SAVE
//! ```
//!
//! Scripts are parsed once at channel start; syntax errors fail the
//! start. Structural edits (CLEAR, DELSEG, TRUNC, ADDSEG) splice the
//! encoded text and re-parse, which sidesteps parser edge cases across
//! HL7 dialects and keeps segments `\r`-terminated.

pub mod command;
pub mod script;

pub use command::Command;
pub use script::Script;

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for WRAPI operations.
pub type Result<T> = std::result::Result<T, WrapiError>;

/// Errors surfaced while loading or running a WRAPI script.
#[derive(Debug, Error)]
pub enum WrapiError {
    /// A script line did not match any command grammar.
    #[error("syntax error at line {line}: {detail}")]
    Syntax {
        /// 1-based line number within the script.
        line: usize,
        /// What was wrong with the line.
        detail: String,
    },

    /// The script file could not be read.
    #[error("failed to read WRAPI script {}: {source}", .path.display())]
    ScriptIo {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A command failed against the message being transformed.
    #[error("{command} failed: {source}")]
    Command {
        /// Rendered form of the failing command.
        command: String,
        /// Underlying codec error.
        #[source]
        source: hl7::Hl7Error,
    },
}
