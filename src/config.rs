use std::time::Duration;

pub const MAX_FRAME_SIZE: i32 = 10_485_760; // 10MB
const METADATA_STALENESS_SECS: u64 = 3600;
const METADATA_TIMEOUT_SECS: u64 = 10;
const WATERMARK_TIMEOUT_SECS: u64 = 10;
const CONSUME_TIMEOUT_SECS: u64 = 15;
const PARTITION_MAX_BYTES: i32 = 1_048_576; // 1MB per partition per fetch

/// Engine tuning knobs, passed explicitly at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum age of cached topic metadata before a mandatory refresh.
    pub metadata_staleness: Duration,
    /// Timeout for broker metadata round-trips.
    pub metadata_timeout: Duration,
    /// Timeout for watermark and offsets-for-times queries.
    pub watermark_timeout: Duration,
    /// Per-read timeout inside the partition consume loop. A read that
    /// returns nothing within this window ends the partition normally.
    pub consume_timeout: Duration,
    /// Upper bound on the record bytes requested per partition per fetch.
    pub partition_max_bytes: i32,
    /// Client id sent in every request header.
    pub client_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_staleness: Duration::from_secs(METADATA_STALENESS_SECS),
            metadata_timeout: Duration::from_secs(METADATA_TIMEOUT_SECS),
            watermark_timeout: Duration::from_secs(WATERMARK_TIMEOUT_SECS),
            consume_timeout: Duration::from_secs(CONSUME_TIMEOUT_SECS),
            partition_max_bytes: PARTITION_MAX_BYTES,
            client_id: "kafka-browse".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_metadata_staleness(mut self, staleness: Duration) -> Self {
        self.metadata_staleness = staleness;
        self
    }

    pub fn with_consume_timeout(mut self, timeout: Duration) -> Self {
        self.consume_timeout = timeout;
        self
    }

    pub fn with_watermark_timeout(mut self, timeout: Duration) -> Self {
        self.watermark_timeout = timeout;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}
