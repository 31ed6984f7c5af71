//! One named backend collection with its own routing predicate and packet
//! size.
//!
//! A queue's key pool is keyed by correlation id: many concurrent batches
//! share the same `Queue` instance without ever seeing each other's keys.

use std::collections::HashMap;

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::accept::Accepter;
use crate::errors::{DispatchError, Result};
use crate::protocol::{BulkGetRequest, BulkGetResponse, DocRecord};

/// Correlation id binding one `load` call to its later flush.
pub type BatchId = Uuid;

pub const DEFAULT_PACKET_SIZE: usize = 64;

pub struct Queue {
    name: String,
    url: Url,
    settings: RwLock<Settings>,
    pool: Mutex<HashMap<BatchId, Vec<String>>>,
}

/// The parts `Dispatcher::set` may swap while batches are in flight.
struct Settings {
    accepter: Accepter,
    max_packet: usize,
    hidden: bool,
}

impl Queue {
    pub fn new(name: &str, base: &Url, accepter: Accepter, max_packet: usize, hidden: bool) -> Self {
        let mut url = base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name);
        }

        Self {
            name: name.to_string(),
            url,
            settings: RwLock::new(Settings {
                accepter,
                // chunking needs a packet of at least one key
                max_packet: max_packet.max(1),
                hidden,
            }),
            pool: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Hidden queues are skipped by the routing scan and only reachable
    /// through forced routing.
    pub fn is_hidden(&self) -> bool {
        self.settings.read().hidden
    }

    /// Keys accumulated for `batch` and not yet flushed.
    pub fn pending_keys(&self, batch: BatchId) -> usize {
        self.pool.lock().get(&batch).map_or(0, Vec::len)
    }

    pub(crate) fn update(&self, accepter: Accepter, max_packet: Option<usize>, hidden: bool) {
        let mut settings = self.settings.write();
        settings.accepter = accepter;
        if let Some(size) = max_packet.filter(|size| *size > 0) {
            settings.max_packet = size;
        }
        settings.hidden = hidden;
    }

    /// Offers a key to this queue. On acceptance the (possibly rewritten) key
    /// is appended to the batch's pool entry and `true` comes back.
    pub fn push(&self, key: &str, batch: BatchId) -> bool {
        let Some(stored) = self.settings.read().accepter.test(key) else {
            return false;
        };

        self.pool.lock().entry(batch).or_default().push(stored);
        true
    }

    /// Sends the batch's accumulated keys to the backend, one bulk-get call
    /// per packet, all packets concurrently. The pool entry is claimed up
    /// front, so a batch is flushed at most once. Any failing packet fails
    /// the whole flush.
    pub async fn flush(&self, batch: BatchId, client: &Client) -> Result<Vec<DocRecord>> {
        let Some(keys) = self.pool.lock().remove(&batch) else {
            return Ok(Vec::new());
        };

        let max_packet = self.settings.read().max_packet;
        tracing::debug!(
            queue = %self.name,
            keys = keys.len(),
            packets = keys.len().div_ceil(max_packet),
            "flushing batch"
        );

        let packets = keys
            .chunks(max_packet)
            .map(|packet| self.send_packet(packet, client));
        let answers = try_join_all(packets).await?;

        Ok(answers.into_iter().flatten().collect())
    }

    async fn send_packet(&self, keys: &[String], client: &Client) -> Result<Vec<DocRecord>> {
        let response = client
            .post(self.bulk_get_url())
            .json(&BulkGetRequest::new(keys))
            .send()
            .await
            .map_err(|source| DispatchError::BackendRequest {
                endpoint: self.name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            // Surface the backend's own error payload when it parses.
            let detail = response.json::<Value>().await.unwrap_or(Value::Null);
            return Err(DispatchError::BackendStatus {
                endpoint: self.name.clone(),
                status,
                detail,
            });
        }

        let body: BulkGetResponse =
            response
                .json()
                .await
                .map_err(|source| DispatchError::BackendRequest {
                    endpoint: self.name.clone(),
                    source,
                })?;

        let Some(results) = body.results else {
            return Err(DispatchError::NoResults(self.name.clone()));
        };

        results
            .into_iter()
            .map(|result| result.into_record())
            .collect()
    }

    fn bulk_get_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("_bulk_get");
        }
        url
    }
}
