use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info};
use serde::Serialize;

use crate::broker::BrokerConsumer;
use crate::error::{EngineError, Result};

/// A topic as known to the catalog: immutable snapshot between refreshes.
#[derive(Debug, Clone, Serialize)]
pub struct Topic {
    pub name: String,
    pub partitions: Vec<i32>,
    pub internal: bool,
}

/// Per-connection cache of topic metadata, refreshed from the broker on
/// first use and after a fixed staleness window. Isolates callers from
/// redundant metadata round-trips.
///
/// Refresh clears the cached set before refetching, so a broker outage during
/// refresh leaves the catalog empty rather than serving stale data.
pub struct TopicCatalog {
    consumer: Arc<dyn BrokerConsumer>,
    staleness: Duration,
    timeout: Duration,
    state: RwLock<CatalogState>,
}

struct CatalogState {
    topics: IndexMap<String, Topic>,
    refreshed_at: Option<Instant>,
}

impl TopicCatalog {
    pub fn new(consumer: Arc<dyn BrokerConsumer>, staleness: Duration, timeout: Duration) -> Self {
        Self {
            consumer,
            staleness,
            timeout,
            state: RwLock::new(CatalogState {
                topics: IndexMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// All topics in catalog order (see [`compare_topics`]).
    pub async fn get_topics(&self) -> Result<Vec<Topic>> {
        self.ensure_fresh().await?;
        Ok(self.state.read().unwrap().topics.values().cloned().collect())
    }

    /// Look up one topic, forcing exactly one extra refresh on a miss before
    /// failing with `UnknownTopic`.
    pub async fn validate(&self, name: &str) -> Result<Topic> {
        self.ensure_fresh().await?;
        if let Some(topic) = self.lookup(name) {
            return Ok(topic);
        }
        debug!("topic {} missing from catalog, forcing a refresh", name);
        self.refresh().await?;
        self.lookup(name)
            .ok_or_else(|| EngineError::UnknownTopic(name.to_string()))
    }

    fn lookup(&self, name: &str) -> Option<Topic> {
        self.state.read().unwrap().topics.get(name).cloned()
    }

    async fn ensure_fresh(&self) -> Result<()> {
        let fresh = {
            let state = self.state.read().unwrap();
            !state.topics.is_empty()
                && state
                    .refreshed_at
                    .is_some_and(|at| at.elapsed() < self.staleness)
        };
        if fresh {
            return Ok(());
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<()> {
        // Clear first: a failed refetch leaves the catalog empty.
        {
            let mut state = self.state.write().unwrap();
            state.topics.clear();
            state.refreshed_at = None;
        }

        let metadata = self
            .consumer
            .get_metadata(self.timeout)
            .await
            .map_err(EngineError::TopicLoadFailed)?;

        let mut topics: Vec<Topic> = metadata
            .into_iter()
            .map(|m| Topic {
                name: m.name,
                partitions: m.partitions,
                internal: m.internal,
            })
            .collect();
        topics.sort_by(|a, b| compare_topics(&a.name, &b.name));

        let mut state = self.state.write().unwrap();
        state.topics = topics.into_iter().map(|t| (t.name.clone(), t)).collect();
        state.refreshed_at = Some(Instant::now());
        info!("topic catalog refreshed: {} topics", state.topics.len());
        Ok(())
    }
}

/// Default catalog ordering: ascending by name, with underscore-prefixed
/// (typically internal) topics after regular ones; more leading underscores
/// sort later still.
pub fn compare_topics(a: &str, b: &str) -> Ordering {
    let prefix_a = a.chars().take_while(|&c| c == '_').count();
    let prefix_b = b.chars().take_while(|&c| c == '_').count();
    prefix_a.cmp(&prefix_b).then_with(|| a.cmp(b))
}
