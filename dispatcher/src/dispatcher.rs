//! Routing of keys to queues and batch-wide flushing.

use std::sync::Arc;

use futures::future::try_join_all;
use indexmap::IndexMap;
use parking_lot::RwLock;
use reqwest::Client;
use url::Url;
use uuid::Uuid;

use crate::accept::Accepter;
use crate::errors::Result;
use crate::merge::{self, ResultMap};
use crate::queue::{BatchId, DEFAULT_PACKET_SIZE, Queue};

/// Owns the named queues and drives load/flush cycles against them.
///
/// All per-batch state lives inside the queues, keyed by correlation id; the
/// dispatcher itself only holds configuration and the shared HTTP client, so
/// one instance serves any number of concurrent requests.
pub struct Dispatcher {
    base_url: Url,
    default_packet: usize,
    client: Client,
    queues: RwLock<IndexMap<String, Arc<Queue>>>,
}

impl Dispatcher {
    pub fn new(base_url: Url) -> Self {
        Self::with_packet_size(base_url, DEFAULT_PACKET_SIZE)
    }

    pub fn with_packet_size(base_url: Url, default_packet: usize) -> Self {
        Self {
            base_url,
            default_packet: default_packet.max(1),
            client: Client::new(),
            queues: RwLock::new(IndexMap::new()),
        }
    }

    /// Upserts the queue for `name`. An existing queue keeps its accumulated
    /// batches and gets the new accepter, packet size (when positive) and
    /// hidden flag; otherwise a fresh queue is registered at the end of the
    /// scan order.
    pub fn set(&self, name: &str, accepter: Accepter, packet_size: Option<usize>, hidden: bool) {
        let mut queues = self.queues.write();
        if let Some(queue) = queues.get(name) {
            queue.update(accepter, packet_size, hidden);
        } else {
            let size = packet_size
                .filter(|size| *size > 0)
                .unwrap_or(self.default_packet);
            queues.insert(
                name.to_string(),
                Arc::new(Queue::new(name, &self.base_url, accepter, size, hidden)),
            );
        }
    }

    pub fn remove(&self, name: &str) {
        if self.queues.write().shift_remove(name).is_none() {
            tracing::warn!(endpoint = name, "no queue to remove for endpoint");
        }
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.read().get(name).cloned()
    }

    /// Routes `keys` into the queues under a fresh correlation id and returns
    /// that id for the later flush.
    ///
    /// Without a forced endpoint, each key goes to the first non-hidden queue
    /// accepting it, in registration order. With one, every key is offered to
    /// that queue only (lazily created as hidden, accept-all when unknown).
    /// Keys nobody accepts are logged and dropped; the batch stays valid.
    pub fn load(&self, keys: &[String], forced: Option<&str>) -> BatchId {
        let batch = Uuid::new_v4();

        match forced {
            Some(endpoint) => {
                let queue = self.forced_queue(endpoint);
                for key in keys {
                    if !queue.push(key, batch) {
                        tracing::warn!(key = %key, endpoint, "forced queue rejected key");
                    }
                }
            }
            None => {
                let queues: Vec<Arc<Queue>> = self
                    .queues
                    .read()
                    .values()
                    .filter(|queue| !queue.is_hidden())
                    .cloned()
                    .collect();

                for key in keys {
                    let routed = queues.iter().any(|queue| queue.push(key, batch));
                    if !routed {
                        tracing::warn!(key = %key, "no queue accepted key, dropping it");
                    }
                }
            }
        }

        batch
    }

    /// Flushes every queue one after the other, bounding peak backend
    /// concurrency to a single queue's packet fan-out.
    pub async fn flush(&self, batch: BatchId) -> Result<ResultMap> {
        let queues = self.snapshot();

        let mut collected = Vec::with_capacity(queues.len());
        for queue in &queues {
            collected.push(queue.flush(batch, &self.client).await?);
        }

        merge::flatten(collected).await
    }

    /// Flushes every queue concurrently; the preferred path when serving
    /// requests.
    pub async fn p_flush(&self, batch: BatchId) -> Result<ResultMap> {
        let queues = self.snapshot();

        let collected =
            try_join_all(queues.iter().map(|queue| queue.flush(batch, &self.client))).await?;

        merge::flatten(collected).await
    }

    fn forced_queue(&self, name: &str) -> Arc<Queue> {
        if let Some(queue) = self.queues.read().get(name) {
            return queue.clone();
        }

        self.queues
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Queue::new(
                    name,
                    &self.base_url,
                    Accepter::accept_all(),
                    self.default_packet,
                    true,
                ))
            })
            .clone()
    }

    fn snapshot(&self) -> Vec<Arc<Queue>> {
        self.queues.read().values().cloned().collect()
    }
}
