//! HL7 channel runtime.
//!
//! Ties the codec crates together into three channel kinds (inbound
//! MLLP listeners, translate pipelines and outbound MLLP senders),
//! each managed by a per-kind [`Runtime`] with counters persisted
//! across restarts through the [`StatsStore`].

pub mod common;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod runtime;
pub mod stats;
pub mod transformer;
pub mod translate;

pub use error::{ChannelError, Result};
pub use inbound::InboundChannel;
pub use outbound::OutboundChannel;
pub use runtime::{
    ChannelKind, ChannelState, ChannelStatus, InboundRuntime, ManagedChannel, OutboundRuntime,
    Runtime, RuntimeDeps, TranslateRuntime,
};
pub use stats::{ChannelCounters, StatsRecord, StatsStore};
pub use transformer::{
    create_transformer, TransformContext, Transformer, TransformerRegistry, WrapiTransformer,
};
pub use translate::TranslateChannel;
