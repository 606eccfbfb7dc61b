use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;

/// Topic metadata as reported by the broker.
#[derive(Debug, Clone)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<i32>,
    pub internal: bool,
}

/// The `[low, high)` offset bounds currently available for a partition.
/// `high` is one past the last written offset. Watermarks change continuously
/// and are queried live on every fetch, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub low: i64,
    pub high: i64,
}

impl Watermarks {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }
}

/// One record read from an assigned partition.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: IndexMap<String, Vec<u8>>,
}

/// Result of a single bounded read. `Eof` and `Timeout` are normal terminal
/// signals for the reading side, not errors.
#[derive(Debug)]
pub enum ConsumeOutcome {
    Record(ConsumedRecord),
    /// The assigned partition has no records at or past the current offset.
    Eof,
    /// Nothing arrived within the read timeout; more data may exist later.
    Timeout,
}

/// A single broker connection. One round-trip is in flight at a time per
/// connection; implementations serialize callers internally.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Fetch the full topic list with per-topic partition ids.
    async fn get_metadata(&self, timeout: Duration) -> anyhow::Result<Vec<TopicMetadata>>;

    /// Query the live `[low, high)` watermarks for one partition.
    async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> anyhow::Result<Watermarks>;

    /// Resolve `(partition, timestamp_millis)` pairs to the earliest offset
    /// at or after each timestamp. A broker answer of `-1` means no such
    /// record exists.
    async fn offsets_for_times(
        &self,
        topic: &str,
        targets: &[(i32, i64)],
        timeout: Duration,
    ) -> anyhow::Result<Vec<(i32, i64)>>;

    /// Assign this connection to one partition and seek to `offset`.
    /// Replaces any previous assignment.
    async fn assign(&self, topic: &str, partition: i32, offset: i64) -> anyhow::Result<()>;

    /// Read the next record from the assigned partition, waiting at most
    /// `timeout` for data to arrive.
    async fn consume(&self, timeout: Duration) -> anyhow::Result<ConsumeOutcome>;

    /// Release the underlying socket.
    async fn close(&self);
}

/// Creates broker connections, one per call. Callers own the lifetime and
/// caching of the connections they create.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create_new(&self, address: &str) -> anyhow::Result<Arc<dyn BrokerConsumer>>;
}
