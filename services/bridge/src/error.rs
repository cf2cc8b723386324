//! Error types for the channel runtime.

use thiserror::Error;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Main error type for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// TCP bind failed; fatal for the affected inbound channel.
    #[error("failed to bind channel {channel} on port {port}: {source}")]
    Bind {
        /// The channel that failed to bind.
        channel: String,
        /// The requested listen port.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// A channel referenced a name the manager has no config for.
    #[error("no configuration for channel {0}")]
    UnknownChannel(String),

    /// Per-channel configuration problem discovered at start.
    #[error("configuration error for channel {channel}: {detail}")]
    Config {
        /// The affected channel.
        channel: String,
        /// What was wrong.
        detail: String,
    },

    /// File name glob could not be compiled.
    #[error("invalid file pattern {pattern:?}: {source}")]
    Pattern {
        /// The offending glob.
        pattern: String,
        /// Underlying glob error.
        #[source]
        source: globset::Error,
    },

    /// WRAPI script failed to load or run.
    #[error("transform failed: {0}")]
    Transform(#[from] wrapi::WrapiError),

    /// HL7 text could not be parsed or re-encoded.
    #[error("HL7 codec error: {0}")]
    Codec(#[from] hl7::Hl7Error),

    /// MLLP framing, connect or deadline failure.
    #[error("MLLP error: {0}")]
    Mllp(#[from] mllp::MllpError),

    /// A source file was empty.
    #[error("Empty HL7 file")]
    EmptyFile,

    /// The input bytes were not valid UTF-8.
    #[error("input is not valid UTF-8")]
    NotUtf8,

    /// The peer closed without a framed acknowledgement.
    #[error("peer closed before sending an acknowledgement")]
    NoAck,

    /// One or more destination writes failed; the file fails as a unit.
    #[error("one or more destinations failed: {}", .failures.join(" | "))]
    DestinationWrite {
        /// Per-destination failure descriptions.
        failures: Vec<String>,
    },

    /// Filesystem error outside the destination-write phase.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Short stable kind tag, recorded in error sidecars.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::Bind { .. } => "BindError",
            ChannelError::UnknownChannel(_) => "UnknownChannel",
            ChannelError::Config { .. } => "ConfigError",
            ChannelError::Pattern { .. } => "PatternError",
            ChannelError::Transform(_) => "TransformError",
            ChannelError::Codec(_) => "ParseError",
            ChannelError::Mllp(mllp::MllpError::Timeout { .. })
            | ChannelError::Mllp(mllp::MllpError::ConnectTimeout { .. }) => "TimeoutError",
            ChannelError::Mllp(_) => "FramingError",
            ChannelError::EmptyFile => "EmptyFile",
            ChannelError::NotUtf8 => "EncodingError",
            ChannelError::NoAck => "NoAck",
            ChannelError::DestinationWrite { .. } => "IOWriteError",
            ChannelError::Io(_) => "IOError",
        }
    }
}
