//! Reduction of per-queue result lists into one id-keyed map.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde_json::{Map, Value};

use crate::errors::{DispatchError, Result};
use crate::protocol::DocRecord;

/// Merged batch output: document id to its remaining fields.
pub type ResultMap = HashMap<String, Map<String, Value>>;

/// Folds every queue's record list into a single id-keyed map.
///
/// Lists are folded one at a time with a cooperative yield in between, so
/// merging a very large batch cannot starve other request tasks on the
/// runtime. Per-document error records are dropped; the same id arriving
/// twice fails the whole merge.
pub async fn flatten(lists: Vec<Vec<DocRecord>>) -> Result<ResultMap> {
    let mut merged = ResultMap::new();

    for list in lists {
        for record in list {
            match record {
                DocRecord::Error(detail) => {
                    tracing::debug!(%detail, "dropping errored document from merge");
                }
                DocRecord::Found { id, fields } => match merged.entry(id) {
                    Entry::Occupied(slot) => {
                        return Err(DispatchError::DuplicateId(slot.key().clone()));
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(fields);
                    }
                },
            }
        }

        tokio::task::yield_now().await;
    }

    Ok(merged)
}
