use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerConsumer, ConsumeOutcome};
use crate::engine::stream::{Message, MessageStream};
use crate::engine::watermarks::PartitionPlan;

/// Drives the consume loop for one partition: assign once, then read until
/// the planned count is reached, the partition ends, a read times out or the
/// fetch is cancelled. EOF and timeout are normal terminal states; there is
/// no retry here.
pub(crate) struct PartitionFetcher {
    consumer: Arc<dyn BrokerConsumer>,
    topic: String,
    plan: PartitionPlan,
    read_timeout: Duration,
}

impl PartitionFetcher {
    pub(crate) fn new(
        consumer: Arc<dyn BrokerConsumer>,
        topic: String,
        plan: PartitionPlan,
        read_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            topic,
            plan,
            read_timeout,
        }
    }

    /// Appends up to `plan.limit` records to `stream` and returns the count
    /// actually delivered.
    pub(crate) async fn run(
        &self,
        stream: &MessageStream,
        cancel: &CancellationToken,
    ) -> anyhow::Result<usize> {
        if self.plan.limit == 0 {
            return Ok(0);
        }

        self.consumer
            .assign(&self.topic, self.plan.partition, self.plan.offset)
            .await?;

        let mut delivered = 0;
        while delivered < self.plan.limit {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(
                        "fetch cancelled for {}[{}] after {} records",
                        self.topic, self.plan.partition, delivered
                    );
                    break;
                }
                outcome = self.consumer.consume(self.read_timeout) => outcome?,
            };

            match outcome {
                ConsumeOutcome::Record(record) => {
                    // Broker batches are returned whole; anything below the
                    // resolved start is not part of this fetch.
                    if record.offset < self.plan.offset {
                        continue;
                    }
                    stream.push(Message::from(record));
                    delivered += 1;
                }
                ConsumeOutcome::Eof => {
                    debug!(
                        "end of partition {}[{}] after {} records",
                        self.topic, self.plan.partition, delivered
                    );
                    break;
                }
                ConsumeOutcome::Timeout => {
                    debug!(
                        "no more data from {}[{}] within {:?}, stopping at {} records",
                        self.topic, self.plan.partition, self.read_timeout, delivered
                    );
                    break;
                }
            }
        }
        Ok(delivered)
    }
}
