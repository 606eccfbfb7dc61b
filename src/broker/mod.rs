pub(crate) mod protocol;
pub mod consumer;
pub mod wire;

pub use consumer::{
    BrokerConsumer, ConsumeOutcome, ConsumedRecord, ConsumerFactory, TopicMetadata, Watermarks,
};
pub use wire::{WireConsumer, WireConsumerFactory};
