//! Wire types for the backend `_bulk_get` endpoint.
//!
//! Request body: `{"docs": [{"id": "k1"}, {"id": "k2"}]}`. Response body:
//! `{"results": [{"id": "k1", "docs": [variant]}]}` where the first variant
//! is either `{"error": ...}` or `{"ok": {<document fields>}}`. Field names
//! starting with the reserved prefix are backend bookkeeping and never reach
//! callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DispatchError, Result};

/// Field prefix the backend reserves for its own bookkeeping.
pub const RESERVED_PREFIX: char = '_';

#[derive(Debug, Serialize)]
pub struct BulkGetRequest {
    pub docs: Vec<DocLookup>,
}

#[derive(Debug, Serialize)]
pub struct DocLookup {
    pub id: String,
}

impl BulkGetRequest {
    pub fn new(keys: &[String]) -> Self {
        Self {
            docs: keys
                .iter()
                .map(|key| DocLookup { id: key.clone() })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkGetResponse {
    /// Absent `results` means the backend answered something that is not a
    /// bulk-get response; the whole packet fails.
    pub results: Option<Vec<LookupResult>>,
}

/// One per-id entry of a bulk-get response.
#[derive(Debug, Deserialize)]
pub struct LookupResult {
    pub id: String,
    pub docs: Vec<DocVariant>,
}

#[derive(Debug, Deserialize)]
pub struct DocVariant {
    pub ok: Option<Map<String, Value>>,
    pub error: Option<Value>,
}

/// One unwrapped record from a bulk-get answer.
#[derive(Debug, Clone, PartialEq)]
pub enum DocRecord {
    /// Document found. `fields` no longer carries the id or any
    /// reserved-prefix field.
    Found {
        id: String,
        fields: Map<String, Value>,
    },
    /// Per-document backend error, dropped later during the merge.
    Error(Value),
}

impl LookupResult {
    /// Unwraps the first document variant the backend returned for this id.
    pub fn into_record(self) -> Result<DocRecord> {
        let LookupResult { id, docs } = self;

        let Some(variant) = docs.into_iter().next() else {
            return Err(DispatchError::EmptyResult(id));
        };

        if let Some(error) = variant.error {
            return Ok(DocRecord::Error(error));
        }

        let Some(document) = variant.ok else {
            return Err(DispatchError::EmptyResult(id));
        };

        let fields = document
            .into_iter()
            .filter(|(name, _)| !name.starts_with(RESERVED_PREFIX) && name != "id")
            .collect();

        Ok(DocRecord::Found { id, fields })
    }
}
