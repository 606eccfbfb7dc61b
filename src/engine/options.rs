use serde::{Deserialize, Serialize};

/// A fetch coordinate: either a record offset or a wall-clock timestamp in
/// epoch milliseconds.
///
/// Negative offsets count back from one past the last record, so `-1` means
/// "end of partition" and `-(1 + n)` means "the last n records". Timestamps
/// are resolved to offsets through the broker before consumption starts;
/// resolution output is always a concrete offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Position {
    Offset(i64),
    Timestamp(i64),
}

impl Position {
    /// First record of the partition.
    pub const START: Position = Position::Offset(0);
    /// One past the last record, resolved against the high watermark.
    pub const END: Position = Position::Offset(-1);

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Position::Timestamp(_))
    }
}

/// What to fetch: a start position, an optional exclusive end position and a
/// result-count limit. The limit is distributed across partitions on
/// topic-level fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    pub start: Position,
    #[serde(default)]
    pub end: Option<Position>,
    pub limit: usize,
}

impl FetchOptions {
    pub fn new(start: Position, limit: usize) -> Self {
        Self {
            start,
            end: None,
            limit,
        }
    }

    pub fn from_offset(offset: i64, limit: usize) -> Self {
        Self::new(Position::Offset(offset), limit)
    }

    pub fn from_timestamp(epoch_millis: i64, limit: usize) -> Self {
        Self::new(Position::Timestamp(epoch_millis), limit)
    }

    /// The last `n` records of the topic or partition.
    pub fn latest(n: usize) -> Self {
        Self::new(Position::Offset(-(n as i64) - 1), n)
    }

    /// Bound the fetch by an exclusive end position.
    pub fn until(mut self, end: Position) -> Self {
        self.end = Some(end);
        self
    }
}
