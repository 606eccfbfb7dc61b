use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy.
///
/// Broker read timeouts are deliberately absent: a timed-out read is a normal
/// "no more data right now" terminal state for a partition, surfaced as
/// [`crate::broker::ConsumeOutcome::Timeout`], never as an error. Nothing
/// here is retried automatically; callers re-issue a fresh fetch.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("cluster not registered: {0}")]
    ClusterNotRegistered(String),

    #[error("failed to load topic metadata")]
    TopicLoadFailed(#[source] anyhow::Error),

    #[error("watermark query failed for {topic}[{partition}]")]
    WatermarkQueryFailed {
        topic: String,
        partition: i32,
        #[source]
        source: anyhow::Error,
    },

    #[error("timestamp lookup failed for {topic}")]
    TimestampLookupFailed {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("broker connection failed for {address}")]
    ConnectFailed {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}
