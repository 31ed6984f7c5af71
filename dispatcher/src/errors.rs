use serde_json::Value;
use thiserror::Error;

/// Result type alias for dispatcher operations
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

/// Errors that fail a whole batch. Per-document backend errors are not in
/// here; those travel as [`crate::protocol::DocRecord::Error`] records and are
/// dropped during the merge.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("bulk-get request to {endpoint} failed: {source}")]
    BackendRequest {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend at {endpoint} answered {status}: {detail}")]
    BackendStatus {
        endpoint: String,
        status: reqwest::StatusCode,
        detail: Value,
    },

    #[error("no results in bulk-get response from {0}")]
    NoResults(String),

    #[error("bulk-get result for {0} carried no document variant")]
    EmptyResult(String),

    #[error("duplicate document id {0} across queue results")]
    DuplicateId(String),
}
