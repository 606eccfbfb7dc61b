//! Partitioned message-fetch engine for browsing Kafka topics.
//!
//! Given a topic (or topic+partition) and fetch options (start position,
//! optional end position, result-count limit), the engine resolves broker
//! watermarks and timestamps into concrete offsets, distributes the requested
//! count across partitions, consumes each partition concurrently with bounded
//! timeouts and streams the results into a [`engine::MessageStream`].
//!
//! The engine is read-only: it never produces messages, commits offsets or
//! joins consumer groups.

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;

pub use broker::{BrokerConsumer, ConsumerFactory, WireConsumerFactory};
pub use config::EngineConfig;
pub use engine::{BrowseEngine, FetchOptions, Message, MessageStream, Position, Topic};
pub use error::{EngineError, Result};
