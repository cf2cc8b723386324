//! MLLP framing for HL7 v2 over TCP.
//!
//! A framed message on the wire is `<SB> payload <EB> <CR>` where
//! `SB = 0x0B`, `EB = 0x1C`, `CR = 0x0D`. The payload is UTF-8 HL7 text.
//! This crate provides the stream-level codec ([`FrameReader`],
//! [`write_frame`]) and a small client ([`MllpClient`]) for
//! send-one-message / read-one-reply exchanges.

pub mod client;
pub mod codec;

pub use client::MllpClient;
pub use codec::{write_frame, FrameReader};

use thiserror::Error;

/// Start-of-block byte (`<VT>`).
pub const SB: u8 = 0x0B;
/// End-of-block byte (`<FS>`).
pub const EB: u8 = 0x1C;
/// Carriage return, the frame trailer and HL7 segment terminator.
pub const CR: u8 = 0x0D;

/// Default per-frame payload cap: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Result type alias for MLLP operations.
pub type Result<T> = std::result::Result<T, MllpError>;

/// Errors surfaced by the MLLP codec and client.
#[derive(Debug, Error)]
pub enum MllpError {
    /// No complete frame arrived within the deadline.
    #[error("MLLP read timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Connect attempt did not complete within the deadline.
    #[error("MLLP connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Remote address.
        addr: String,
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The stream closed between start-of-block and end-of-block.
    #[error("stream closed mid-frame with {bytes_buffered} payload bytes pending")]
    UnexpectedEof {
        /// Payload bytes accumulated before the close.
        bytes_buffered: usize,
    },

    /// The payload grew past the configured cap.
    #[error("frame exceeds maximum size: {size} > {max}")]
    FrameTooLarge {
        /// Bytes accumulated so far.
        size: usize,
        /// Configured cap.
        max: usize,
    },

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
