//! Structural HL7 v2 codec.
//!
//! Parses pipe-delimited HL7 text into a [`Message`] of segments and
//! fields, encodes back to CR-terminated text, resolves terser-style
//! field paths, and generates ACK replies. No semantic validation is
//! performed; the message is treated structurally.

pub mod ack;
pub mod message;
pub mod path;

pub use ack::{fallback_ack, AckReason};
pub use message::{Message, Segment, Separators};
pub use path::FieldPath;

use thiserror::Error;

/// Result type alias for HL7 codec operations.
pub type Result<T> = std::result::Result<T, Hl7Error>;

/// Errors surfaced by the HL7 codec.
#[derive(Debug, Error)]
pub enum Hl7Error {
    /// The input contained no segments.
    #[error("empty HL7 message")]
    Empty,

    /// The first segment is not an MSH header.
    #[error("message does not start with an MSH segment")]
    MissingMsh,

    /// A segment line is too short to carry a 3-character ID.
    #[error("malformed segment line: {line:?}")]
    InvalidSegment {
        /// The offending line, truncated for logging.
        line: String,
    },

    /// A field path string did not match the path grammar.
    #[error("invalid field path: {path:?}")]
    InvalidPath {
        /// The offending path expression.
        path: String,
    },

    /// A path addressed a segment occurrence the message does not have.
    #[error("segment {segment}({occurrence}) not present")]
    SegmentNotFound {
        /// Three-character segment ID.
        segment: String,
        /// Zero-based occurrence index.
        occurrence: usize,
    },

    /// The source message has no MSH-10 control ID to acknowledge.
    #[error("cannot generate ACK: MSH-10 control ID is missing")]
    MissingControlId,
}
