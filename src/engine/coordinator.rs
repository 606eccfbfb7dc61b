use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerConsumer, ConsumerFactory, Watermarks};
use crate::config::EngineConfig;
use crate::engine::catalog::{Topic, TopicCatalog};
use crate::engine::fetcher::PartitionFetcher;
use crate::engine::options::{FetchOptions, Position};
use crate::engine::stream::{Message, MessageStream};
use crate::engine::watermarks::{self, PartitionPlan};
use crate::error::{EngineError, Result};

/// The engine's façade for one cluster: resolves positions against live
/// watermarks, distributes the limit and dispatches per-partition fetchers
/// into a shared [`MessageStream`].
pub struct FetchCoordinator {
    config: EngineConfig,
    address: String,
    shared: Arc<dyn BrokerConsumer>,
    factory: Arc<dyn ConsumerFactory>,
    catalog: TopicCatalog,
}

impl FetchCoordinator {
    pub fn new(
        config: EngineConfig,
        address: String,
        shared: Arc<dyn BrokerConsumer>,
        factory: Arc<dyn ConsumerFactory>,
    ) -> Self {
        let catalog = TopicCatalog::new(
            shared.clone(),
            config.metadata_staleness,
            config.metadata_timeout,
        );
        Self {
            config,
            address,
            shared,
            factory,
            catalog,
        }
    }

    pub fn catalog(&self) -> &TopicCatalog {
        &self.catalog
    }

    pub(crate) fn shared_consumer(&self) -> &Arc<dyn BrokerConsumer> {
        &self.shared
    }

    pub async fn topics(&self) -> Result<Vec<Topic>> {
        self.catalog.get_topics().await
    }

    /// Fetch across all partitions of a topic. Returns as soon as positions
    /// are resolved; consumption happens on background tasks.
    pub async fn fetch(
        &self,
        topic: &str,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        let meta = self.catalog.validate(topic).await?;
        self.fetch_partitions(topic, meta.partitions, options, cancel)
            .await
    }

    /// Fetch one explicit partition.
    pub async fn fetch_partition(
        &self,
        topic: &str,
        partition: i32,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        let meta = self.catalog.validate(topic).await?;
        if !meta.partitions.contains(&partition) {
            return Err(EngineError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }
        self.fetch_partitions(topic, vec![partition], options, cancel)
            .await
    }

    /// Blocking convenience: drain the stream to completion and return the
    /// records sorted by timestamp.
    pub async fn fetch_all(
        &self,
        topic: &str,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<Message>> {
        let stream = self.fetch(topic, options, cancel).await?;
        let mut messages = stream.collect().await;
        messages.sort_by_key(|m| m.epoch_millis);
        Ok(messages)
    }

    pub async fn fetch_partition_all(
        &self,
        topic: &str,
        partition: i32,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<Message>> {
        let stream = self.fetch_partition(topic, partition, options, cancel).await?;
        let mut messages = stream.collect().await;
        messages.sort_by_key(|m| m.epoch_millis);
        Ok(messages)
    }

    async fn fetch_partitions(
        &self,
        topic: &str,
        partitions: Vec<i32>,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        let plans = self.resolve(topic, &partitions, options).await?;
        let stream = MessageStream::new();

        let live: Vec<PartitionPlan> = plans.into_iter().filter(|p| p.limit > 0).collect();
        if live.is_empty() {
            debug!("nothing to fetch from {}, completing immediately", topic);
            stream.complete();
            return Ok(stream);
        }

        info!(
            "fetching {} from {} partition(s) of {}",
            live.iter().map(|p| p.limit).sum::<usize>(),
            live.len(),
            topic
        );

        let mut handles = Vec::with_capacity(live.len());
        if live.len() == 1 {
            // Exactly one partition: reuse the shared per-cluster connection
            // instead of opening a new one.
            let plan = live[0];
            let fetcher = PartitionFetcher::new(
                self.shared.clone(),
                topic.to_string(),
                plan,
                self.config.consume_timeout,
            );
            let task_stream = stream.clone();
            let task_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                (plan.partition, fetcher.run(&task_stream, &task_cancel).await)
            }));
        } else {
            // Fan-out: one short-lived connection per partition so the
            // fetchers never serialize on the shared connection's lock.
            for plan in live {
                let factory = self.factory.clone();
                let address = self.address.clone();
                let topic = topic.to_string();
                let read_timeout = self.config.consume_timeout;
                let task_stream = stream.clone();
                let task_cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    let result = match factory.create_new(&address).await {
                        Ok(consumer) => {
                            let fetcher = PartitionFetcher::new(
                                consumer.clone(),
                                topic,
                                plan,
                                read_timeout,
                            );
                            let result = fetcher.run(&task_stream, &task_cancel).await;
                            consumer.close().await;
                            result
                        }
                        Err(e) => Err(e),
                    };
                    (plan.partition, result)
                }));
            }
        }

        // Supervisor: a failed partition contributes zero records and never
        // aborts its siblings; the stream always completes.
        let topic_name = topic.to_string();
        let done_stream = stream.clone();
        tokio::spawn(async move {
            let mut total = 0usize;
            for joined in join_all(handles).await {
                match joined {
                    Ok((partition, Ok(count))) => {
                        debug!("partition {}[{}] delivered {}", topic_name, partition, count);
                        total += count;
                    }
                    Ok((partition, Err(e))) => {
                        error!("fetch failed for {}[{}]: {:#}", topic_name, partition, e);
                    }
                    Err(e) => {
                        error!("fetch task for {} panicked: {}", topic_name, e);
                    }
                }
            }
            info!("fetch complete for {}: {} records", topic_name, total);
            done_stream.complete();
        });

        Ok(stream)
    }

    /// Resolve watermarks, timestamps and the limit split into concrete
    /// per-partition plans.
    async fn resolve(
        &self,
        topic: &str,
        partitions: &[i32],
        options: &FetchOptions,
    ) -> Result<Vec<PartitionPlan>> {
        // Watermarks change continuously, so they are queried live on every
        // fetch, serialized through the shared connection.
        let mut marks: Vec<(i32, Watermarks)> = Vec::with_capacity(partitions.len());
        for &partition in partitions {
            let wm = self
                .shared
                .query_watermarks(topic, partition, self.config.watermark_timeout)
                .await
                .map_err(|source| EngineError::WatermarkQueryFailed {
                    topic: topic.to_string(),
                    partition,
                    source,
                })?;
            marks.push((partition, wm));
        }

        let start_at = match options.start {
            Position::Timestamp(ts) => Some(self.offsets_at(topic, partitions, ts).await?),
            Position::Offset(_) => None,
        };
        let end_at = match options.end {
            Some(Position::Timestamp(ts)) => Some(self.offsets_at(topic, partitions, ts).await?),
            _ => None,
        };

        let limits = watermarks::distribute_limit(options.limit, marks.len());
        let fan_out = marks.len() > 1;

        let mut plans = Vec::with_capacity(marks.len());
        for ((partition, wm), limit) in marks.iter().zip(limits) {
            let requested = match options.start {
                // "Last `limit` records" must hold per partition even though
                // the shares differ, so the negative start is recomputed.
                Position::Offset(offset) if offset < 0 && fan_out => {
                    watermarks::fan_out_start(limit)
                }
                Position::Offset(offset) => offset,
                Position::Timestamp(_) => {
                    let lookup = start_at.as_ref().expect("timestamp starts are resolved");
                    match lookup.get(partition).copied() {
                        // no record at or after the timestamp: start at the
                        // end, nothing to read
                        None | Some(-1) => wm.high,
                        Some(offset) => offset,
                    }
                }
            };
            let end = match options.end {
                None => None,
                Some(Position::Offset(offset)) => Some(watermarks::resolve_offset(offset, wm)),
                Some(Position::Timestamp(_)) => {
                    let lookup = end_at.as_ref().expect("timestamp ends are resolved");
                    Some(match lookup.get(partition).copied() {
                        None | Some(-1) => wm.high,
                        Some(offset) => offset,
                    })
                }
            };
            plans.push(watermarks::plan_partition(*partition, requested, limit, wm, end));
        }
        Ok(plans)
    }

    async fn offsets_at(
        &self,
        topic: &str,
        partitions: &[i32],
        epoch_millis: i64,
    ) -> Result<HashMap<i32, i64>> {
        let targets: Vec<(i32, i64)> = partitions.iter().map(|&p| (p, epoch_millis)).collect();
        let resolved = self
            .shared
            .offsets_for_times(topic, &targets, self.config.watermark_timeout)
            .await
            .map_err(|source| EngineError::TimestampLookupFailed {
                topic: topic.to_string(),
                source,
            })?;
        Ok(resolved.into_iter().collect())
    }
}
