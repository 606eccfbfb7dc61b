use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::broker::ConsumedRecord;

/// One delivered record. Immutable once constructed from a broker record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub epoch_millis: i64,
    pub headers: IndexMap<String, Vec<u8>>,
    #[serde(with = "serde_bytes")]
    pub key: Option<Vec<u8>>,
    #[serde(with = "serde_bytes")]
    pub value: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl From<ConsumedRecord> for Message {
    fn from(record: ConsumedRecord) -> Self {
        Self {
            epoch_millis: record.timestamp,
            headers: record.headers,
            key: record.key,
            value: record.value,
            partition: record.partition,
            offset: record.offset,
        }
    }
}

/// Append-only, thread-safe sequence of delivered records plus a "more data
/// may arrive" flag.
///
/// Created by the coordinator for exactly one fetch, written to by one task
/// per partition, read by one caller. Readers may poll the growing sequence
/// at any time; the dirty read of the currently-appended prefix is the
/// contract. The `has_more` transition to `false` is terminal and fires the
/// completion signal exactly once.
#[derive(Debug, Clone)]
pub struct MessageStream {
    inner: Arc<StreamInner>,
}

#[derive(Debug)]
struct StreamInner {
    state: Mutex<StreamState>,
    has_more: watch::Sender<bool>,
}

#[derive(Debug)]
struct StreamState {
    records: Vec<Message>,
    subscribers: Vec<mpsc::UnboundedSender<Message>>,
}

impl MessageStream {
    pub(crate) fn new() -> Self {
        let (has_more, _) = watch::channel(true);
        Self {
            inner: Arc::new(StreamInner {
                state: Mutex::new(StreamState {
                    records: Vec::new(),
                    subscribers: Vec::new(),
                }),
                has_more,
            }),
        }
    }

    pub(crate) fn push(&self, message: Message) {
        let mut state = self.inner.state.lock().unwrap();
        state
            .subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());
        state.records.push(message);
    }

    /// True while background fetchers may still append records.
    pub fn has_more(&self) -> bool {
        *self.inner.has_more.borrow()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything appended so far.
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.state.lock().unwrap().records.clone()
    }

    /// Copy of everything appended at or after `index`, for incremental
    /// polling.
    pub fn read_from(&self, index: usize) -> Vec<Message> {
        let state = self.inner.state.lock().unwrap();
        state.records.get(index..).unwrap_or_default().to_vec()
    }

    /// Live feed: replays the already-appended records, then yields new ones
    /// as they land. Ends when the stream completes.
    pub fn subscribe(&self) -> UnboundedReceiverStream<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().unwrap();
        for message in &state.records {
            let _ = tx.send(message.clone());
        }
        if self.has_more() {
            state.subscribers.push(tx);
        }
        UnboundedReceiverStream::new(rx)
    }

    /// Terminal transition; idempotent, signals waiters exactly once.
    pub(crate) fn complete(&self) {
        let was_open = self.inner.has_more.send_replace(false);
        if was_open {
            debug!("message stream complete with {} records", self.len());
            // dropping the senders ends every live feed
            self.inner.state.lock().unwrap().subscribers.clear();
        }
    }

    /// Wait until `has_more` turns false.
    pub async fn wait(&self) {
        let mut has_more = self.inner.has_more.subscribe();
        while *has_more.borrow_and_update() {
            if has_more.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for completion and return the final snapshot.
    pub async fn collect(&self) -> Vec<Message> {
        self.wait().await;
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn message(partition: i32, offset: i64) -> Message {
        Message {
            epoch_millis: offset * 1000,
            headers: IndexMap::new(),
            key: None,
            value: Some(vec![1, 2, 3]),
            partition,
            offset,
        }
    }

    #[test]
    fn push_and_poll() {
        let stream = MessageStream::new();
        assert!(stream.has_more());
        assert!(stream.is_empty());

        stream.push(message(0, 0));
        stream.push(message(0, 1));
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.read_from(1).len(), 1);
        assert_eq!(stream.read_from(5).len(), 0);
    }

    #[test]
    fn complete_is_terminal_and_idempotent() {
        let stream = MessageStream::new();
        stream.complete();
        assert!(!stream.has_more());
        stream.complete();
        assert!(!stream.has_more());
    }

    #[tokio::test]
    async fn wait_returns_once_complete() {
        let stream = MessageStream::new();
        let waiter = stream.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
            waiter.len()
        });
        stream.push(message(1, 7));
        stream.complete();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wait_on_already_complete_stream_returns_immediately() {
        let stream = MessageStream::new();
        stream.complete();
        stream.wait().await;
    }

    #[tokio::test]
    async fn subscribe_replays_then_follows() {
        let stream = MessageStream::new();
        stream.push(message(0, 0));

        let mut feed = stream.subscribe();
        stream.push(message(0, 1));
        stream.complete();

        assert_eq!(feed.next().await.unwrap().offset, 0);
        assert_eq!(feed.next().await.unwrap().offset, 1);
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_completion_only_replays() {
        let stream = MessageStream::new();
        stream.push(message(2, 9));
        stream.complete();

        let mut feed = stream.subscribe();
        assert_eq!(feed.next().await.unwrap().offset, 9);
        assert!(feed.next().await.is_none());
    }
}
