use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use kafka_protocol::messages::fetch_request::{FetchPartition, FetchTopic};
use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::{
    ApiKey, BrokerId, FetchRequest, ListOffsetsRequest, MetadataRequest, RequestKind,
    ResponseKind, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{Compression, RecordBatchDecoder};
use log::{debug, warn};
use tokio::sync::Mutex;

use super::consumer::{
    BrokerConsumer, ConsumeOutcome, ConsumedRecord, ConsumerFactory, TopicMetadata, Watermarks,
};
use super::protocol::BrokerChannel;
use crate::config::EngineConfig;

const METADATA_VERSION: i16 = 9;
const LIST_OFFSETS_VERSION: i16 = 4;
const FETCH_VERSION: i16 = 11;

const EARLIEST_TIMESTAMP: i64 = -2;
const LATEST_TIMESTAMP: i64 = -1;

/// Slack on top of the broker-side `max_wait_ms` before the client gives up
/// on a fetch response.
const SOCKET_GRACE: Duration = Duration::from_secs(5);

/// A TCP Kafka connection implementing [`BrokerConsumer`].
///
/// All state sits behind one `tokio::sync::Mutex`, so exactly one broker
/// round-trip is in flight at a time per connection. Multi-partition fetches
/// open separate `WireConsumer`s precisely to avoid serializing on this lock.
pub struct WireConsumer {
    address: String,
    client_id: String,
    partition_max_bytes: i32,
    inner: Mutex<WireState>,
}

struct WireState {
    channel: BrokerChannel,
    assignment: Option<Assignment>,
}

struct Assignment {
    topic: String,
    partition: i32,
    next_offset: i64,
    buffered: VecDeque<ConsumedRecord>,
}

impl WireState {
    /// Returns a usable channel, replacing the socket if a previous
    /// round-trip was abandoned mid-flight.
    async fn ensure_connected(
        &mut self,
        address: &str,
        client_id: &str,
    ) -> anyhow::Result<&mut BrokerChannel> {
        if !self.channel.is_healthy() {
            warn!("broker channel to {} is stale, reconnecting", address);
            self.channel.shutdown().await;
            self.channel = BrokerChannel::connect(address, client_id).await?;
        }
        Ok(&mut self.channel)
    }
}

impl WireConsumer {
    pub async fn connect(address: &str, config: &EngineConfig) -> anyhow::Result<Self> {
        let channel = BrokerChannel::connect(address, &config.client_id).await?;
        Ok(Self {
            address: address.to_string(),
            client_id: config.client_id.clone(),
            partition_max_bytes: config.partition_max_bytes,
            inner: Mutex::new(WireState {
                channel,
                assignment: None,
            }),
        })
    }

    fn topic_name(topic: &str) -> TopicName {
        TopicName(StrBytes::from_string(topic.to_string()))
    }

    /// Issue one ListOffsets query for a set of partitions of one topic,
    /// with a shared timestamp sentinel or real timestamps per partition.
    async fn list_offsets(
        channel: &mut BrokerChannel,
        topic: &str,
        targets: &[(i32, i64)],
        timeout: Duration,
    ) -> anyhow::Result<Vec<(i32, i64)>> {
        let partitions = targets
            .iter()
            .map(|&(partition, timestamp)| {
                ListOffsetsPartition::default()
                    .with_partition_index(partition)
                    .with_current_leader_epoch(-1)
                    .with_timestamp(timestamp)
            })
            .collect();
        let request = ListOffsetsRequest::default()
            .with_replica_id(BrokerId(-1))
            .with_isolation_level(0)
            .with_topics(vec![
                ListOffsetsTopic::default()
                    .with_name(Self::topic_name(topic))
                    .with_partitions(partitions),
            ]);

        let response = tokio::time::timeout(
            timeout,
            channel.call(
                ApiKey::ListOffsets,
                LIST_OFFSETS_VERSION,
                &RequestKind::ListOffsets(request),
            ),
        )
        .await
        .map_err(|_| anyhow!("list offsets request timed out for {}", topic))??;

        let ResponseKind::ListOffsets(response) = response else {
            bail!("unexpected response kind to ListOffsets");
        };

        let mut offsets = Vec::with_capacity(targets.len());
        for topic_response in &response.topics {
            for partition in &topic_response.partitions {
                if partition.error_code != 0 {
                    bail!(
                        "broker error code {} listing offsets for {}[{}]",
                        partition.error_code,
                        topic,
                        partition.partition_index
                    );
                }
                offsets.push((partition.partition_index, partition.offset));
            }
        }
        Ok(offsets)
    }
}

#[async_trait]
impl BrokerConsumer for WireConsumer {
    async fn get_metadata(&self, timeout: Duration) -> anyhow::Result<Vec<TopicMetadata>> {
        let mut state = self.inner.lock().await;
        let channel = state.ensure_connected(&self.address, &self.client_id).await?;

        // topics = None asks for every topic in the cluster
        let request = MetadataRequest::default()
            .with_topics(None)
            .with_allow_auto_topic_creation(false);

        let response = tokio::time::timeout(
            timeout,
            channel.call(
                ApiKey::Metadata,
                METADATA_VERSION,
                &RequestKind::Metadata(request),
            ),
        )
        .await
        .map_err(|_| anyhow!("metadata request timed out"))??;

        let ResponseKind::Metadata(response) = response else {
            bail!("unexpected response kind to Metadata");
        };

        let mut topics = Vec::with_capacity(response.topics.len());
        for topic in &response.topics {
            let Some(name) = topic.name.as_ref().map(|n| n.0.to_string()) else {
                continue;
            };
            if topic.error_code != 0 {
                warn!(
                    "skipping topic {} with metadata error code {}",
                    name, topic.error_code
                );
                continue;
            }
            let mut partitions: Vec<i32> = topic
                .partitions
                .iter()
                .map(|p| p.partition_index)
                .collect();
            partitions.sort_unstable();
            topics.push(TopicMetadata {
                name,
                partitions,
                internal: topic.is_internal,
            });
        }
        debug!("metadata returned {} topics", topics.len());
        Ok(topics)
    }

    async fn query_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> anyhow::Result<Watermarks> {
        let mut state = self.inner.lock().await;
        let channel = state.ensure_connected(&self.address, &self.client_id).await?;

        let low = Self::list_offsets(&mut *channel, topic, &[(partition, EARLIEST_TIMESTAMP)], timeout)
            .await?
            .first()
            .map(|&(_, offset)| offset)
            .ok_or_else(|| anyhow!("no earliest offset returned for {}[{}]", topic, partition))?;
        let high = Self::list_offsets(&mut *channel, topic, &[(partition, LATEST_TIMESTAMP)], timeout)
            .await?
            .first()
            .map(|&(_, offset)| offset)
            .ok_or_else(|| anyhow!("no latest offset returned for {}[{}]", topic, partition))?;

        Ok(Watermarks::new(low, high))
    }

    async fn offsets_for_times(
        &self,
        topic: &str,
        targets: &[(i32, i64)],
        timeout: Duration,
    ) -> anyhow::Result<Vec<(i32, i64)>> {
        let mut state = self.inner.lock().await;
        let channel = state.ensure_connected(&self.address, &self.client_id).await?;
        Self::list_offsets(channel, topic, targets, timeout).await
    }

    async fn assign(&self, topic: &str, partition: i32, offset: i64) -> anyhow::Result<()> {
        let mut state = self.inner.lock().await;
        debug!("assigning {}[{}] at offset {}", topic, partition, offset);
        state.assignment = Some(Assignment {
            topic: topic.to_string(),
            partition,
            next_offset: offset,
            buffered: VecDeque::new(),
        });
        Ok(())
    }

    async fn consume(&self, timeout: Duration) -> anyhow::Result<ConsumeOutcome> {
        let mut state = self.inner.lock().await;
        state.ensure_connected(&self.address, &self.client_id).await?;
        let state = &mut *state;
        let Some(assignment) = state.assignment.as_mut() else {
            bail!("consume called without an assigned partition");
        };

        if let Some(record) = assignment.buffered.pop_front() {
            return Ok(ConsumeOutcome::Record(record));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(ConsumeOutcome::Timeout);
            }
            let wait = deadline - now;
            let wait_ms = wait.as_millis().min(i32::MAX as u128) as i32;

            let request = FetchRequest::default()
                .with_replica_id(BrokerId(-1))
                .with_max_wait_ms(wait_ms)
                .with_min_bytes(1)
                .with_max_bytes(self.partition_max_bytes)
                .with_isolation_level(0)
                .with_session_id(0)
                .with_session_epoch(-1)
                .with_topics(vec![
                    FetchTopic::default()
                        .with_topic(Self::topic_name(&assignment.topic))
                        .with_partitions(vec![
                            FetchPartition::default()
                                .with_partition(assignment.partition)
                                .with_current_leader_epoch(-1)
                                .with_fetch_offset(assignment.next_offset)
                                .with_log_start_offset(-1)
                                .with_partition_max_bytes(self.partition_max_bytes),
                        ]),
                ]);

            let response = match tokio::time::timeout(
                wait + SOCKET_GRACE,
                state
                    .channel
                    .call(ApiKey::Fetch, FETCH_VERSION, &RequestKind::Fetch(request)),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    // The channel is now stale and will be replaced on the
                    // next call; for the reader this is just "no data".
                    warn!(
                        "fetch response for {}[{}] did not arrive in time",
                        assignment.topic, assignment.partition
                    );
                    return Ok(ConsumeOutcome::Timeout);
                }
            };

            let ResponseKind::Fetch(response) = response else {
                bail!("unexpected response kind to Fetch");
            };
            if response.error_code != 0 {
                bail!("fetch failed with broker error code {}", response.error_code);
            }
            let topic_response = response
                .responses
                .iter()
                .find(|t| t.topic.0.to_string() == assignment.topic)
                .ok_or_else(|| anyhow!("fetch response missing topic {}", assignment.topic))?;
            let partition_data = topic_response
                .partitions
                .iter()
                .find(|p| p.partition_index == assignment.partition)
                .ok_or_else(|| {
                    anyhow!(
                        "fetch response missing partition {}[{}]",
                        assignment.topic,
                        assignment.partition
                    )
                })?;
            if partition_data.error_code != 0 {
                bail!(
                    "broker error code {} fetching {}[{}]",
                    partition_data.error_code,
                    assignment.topic,
                    assignment.partition
                );
            }

            let high_watermark = partition_data.high_watermark;
            if let Some(records) = &partition_data.records {
                if !records.is_empty() {
                    let mut batch = records.clone();
                    let decoded = RecordBatchDecoder::decode_with_custom_compression::<
                        _,
                        fn(&mut Bytes, Compression) -> Result<Bytes, anyhow::Error>,
                    >(&mut batch, None)?;
                    let mut advance = assignment.next_offset;
                    for record in decoded {
                        // Batches are returned whole; skip anything below the
                        // requested offset.
                        if record.offset < assignment.next_offset {
                            continue;
                        }
                        advance = advance.max(record.offset + 1);
                        if record.control {
                            continue;
                        }
                        assignment.buffered.push_back(ConsumedRecord {
                            partition: assignment.partition,
                            offset: record.offset,
                            timestamp: record.timestamp,
                            key: record.key.map(|k| k.to_vec()),
                            value: record.value.map(|v| v.to_vec()),
                            headers: record
                                .headers
                                .into_iter()
                                .map(|(k, v)| {
                                    (k.to_string(), v.map(|h| h.to_vec()).unwrap_or_default())
                                })
                                .collect(),
                        });
                    }
                    assignment.next_offset = advance;
                }
            }

            if let Some(record) = assignment.buffered.pop_front() {
                return Ok(ConsumeOutcome::Record(record));
            }
            if assignment.next_offset >= high_watermark {
                return Ok(ConsumeOutcome::Eof);
            }
            // Empty or control-only batch below the high watermark: keep
            // waiting out the remaining budget.
        }
    }

    async fn close(&self) {
        let mut state = self.inner.lock().await;
        state.assignment = None;
        state.channel.shutdown().await;
        debug!("closed broker connection to {}", self.address);
    }
}

/// Creates one [`WireConsumer`] per call.
pub struct WireConsumerFactory {
    config: EngineConfig,
}

impl WireConsumerFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConsumerFactory for WireConsumerFactory {
    async fn create_new(&self, address: &str) -> anyhow::Result<Arc<dyn BrokerConsumer>> {
        let consumer = WireConsumer::connect(address, &self.config).await?;
        Ok(Arc::new(consumer))
    }
}
