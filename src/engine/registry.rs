use std::sync::Arc;

use dashmap::DashMap;
use log::info;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::broker::ConsumerFactory;
use crate::config::EngineConfig;
use crate::engine::catalog::Topic;
use crate::engine::coordinator::FetchCoordinator;
use crate::engine::options::FetchOptions;
use crate::engine::stream::{Message, MessageStream};
use crate::error::{EngineError, Result};

/// Upstream façade: clusterId-keyed access to per-cluster coordinators.
/// The shared broker connection for a cluster is created lazily on first use
/// and kept for the lifetime of the registration.
pub struct BrowseEngine {
    config: EngineConfig,
    factory: Arc<dyn ConsumerFactory>,
    clusters: DashMap<String, Arc<ClusterEntry>>,
}

struct ClusterEntry {
    address: String,
    coordinator: OnceCell<Arc<FetchCoordinator>>,
}

impl BrowseEngine {
    pub fn new(config: EngineConfig, factory: Arc<dyn ConsumerFactory>) -> Self {
        Self {
            config,
            factory,
            clusters: DashMap::new(),
        }
    }

    /// Register (or replace) a cluster under an id. No connection is opened
    /// until the cluster is first used.
    pub fn register_cluster(&self, cluster_id: impl Into<String>, address: impl Into<String>) {
        let cluster_id = cluster_id.into();
        let address = address.into();
        info!("registering cluster {} at {}", cluster_id, address);
        self.clusters.insert(
            cluster_id,
            Arc::new(ClusterEntry {
                address,
                coordinator: OnceCell::new(),
            }),
        );
    }

    /// Drop a cluster and release its shared connection.
    pub async fn remove_cluster(&self, cluster_id: &str) {
        if let Some((_, entry)) = self.clusters.remove(cluster_id) {
            if let Some(coordinator) = entry.coordinator.get() {
                coordinator.shared_consumer().close().await;
            }
            info!("removed cluster {}", cluster_id);
        }
    }

    pub async fn topics(&self, cluster_id: &str) -> Result<Vec<Topic>> {
        self.coordinator(cluster_id).await?.topics().await
    }

    /// Non-blocking, incremental fetch. `partition: None` fans out across
    /// the whole topic.
    pub async fn message_stream(
        &self,
        cluster_id: &str,
        topic: &str,
        options: &FetchOptions,
        partition: Option<i32>,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        let coordinator = self.coordinator(cluster_id).await?;
        match partition {
            Some(partition) => {
                coordinator
                    .fetch_partition(topic, partition, options, cancel)
                    .await
            }
            None => coordinator.fetch(topic, options, cancel).await,
        }
    }

    /// Blocking convenience: drains the stream to completion.
    pub async fn messages(
        &self,
        cluster_id: &str,
        topic: &str,
        options: &FetchOptions,
        partition: Option<i32>,
        cancel: CancellationToken,
    ) -> Result<Vec<Message>> {
        let coordinator = self.coordinator(cluster_id).await?;
        match partition {
            Some(partition) => {
                coordinator
                    .fetch_partition_all(topic, partition, options, cancel)
                    .await
            }
            None => coordinator.fetch_all(topic, options, cancel).await,
        }
    }

    async fn coordinator(&self, cluster_id: &str) -> Result<Arc<FetchCoordinator>> {
        let entry = self
            .clusters
            .get(cluster_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::ClusterNotRegistered(cluster_id.to_string()))?;

        let coordinator = entry
            .coordinator
            .get_or_try_init(|| async {
                let shared = self.factory.create_new(&entry.address).await.map_err(
                    |source| EngineError::ConnectFailed {
                        address: entry.address.clone(),
                        source,
                    },
                )?;
                Ok::<_, EngineError>(Arc::new(FetchCoordinator::new(
                    self.config.clone(),
                    entry.address.clone(),
                    shared,
                    self.factory.clone(),
                )))
            })
            .await?;
        Ok(coordinator.clone())
    }
}
