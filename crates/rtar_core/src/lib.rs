//! RTAR Core - live comment stream auto-reply pipeline
//!
//! This crate ingests a live comment stream, decides which comments deserve
//! a reply, generates replies through a pluggable text provider under a time
//! budget, and posts them through a rate-limited device bridge.

pub mod blocklist;
pub mod config;
pub mod connection;
pub mod context;
pub mod delivery;
pub mod dispatcher;
pub mod eligibility;
pub mod error;
pub mod generation;
pub mod message;
pub mod presets;
pub mod processor;

pub use blocklist::{BlockCheck, Blocklist};
pub use config::RtarConfig;
pub use connection::{
    ConnectionManager, ConnectionStatus, Connector, ReconnectPolicy, ReconnectStatus,
    WebSocketConnector, parse_media_id,
};
pub use context::{ContextEntry, ContextWindow};
pub use delivery::{ActuationBridge, AdbBridge, DeliveryChannel, DeliverySettings};
pub use dispatcher::Dispatcher;
pub use eligibility::{Decision, EligibilityFilter, SkipReason};
pub use error::{CoreError, Result};
pub use generation::{OpenAiCompatGenerator, ResponseGenerator};
pub use message::{Message, MessageClass};
pub use presets::PresetStore;
pub use processor::{
    MessageQueue, Processor, ProcessorEvent, ProcessorParts, ProcessorSettings, ProcessorStats,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ActuationBridge, BlockCheck, Blocklist, ConnectionManager, ConnectionStatus, CoreError,
        Decision, DeliveryChannel, Dispatcher, Message, MessageClass, MessageQueue, PresetStore,
        Processor, ResponseGenerator, Result, RtarConfig,
    };
}
