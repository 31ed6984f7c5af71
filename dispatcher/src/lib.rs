//! Request-batching dispatch in front of a bulk-get document store.
//!
//! Callers hand arbitrary key sets to a [`Dispatcher`], which routes each key
//! to a named [`Queue`], splits every queue's accumulated keys into bounded
//! packets, issues one backend `_bulk_get` call per packet, and folds all
//! answers back into a single id-keyed result map. Concurrent batches share
//! the same queues; a per-batch correlation id keeps them isolated.

pub mod accept;
pub mod dispatcher;
pub mod errors;
pub mod merge;
pub mod protocol;
pub mod queue;

#[cfg(test)]
mod testutils;

pub use accept::{AcceptFn, AcceptRule, Acceptance, Accepter};
pub use dispatcher::Dispatcher;
pub use errors::DispatchError;
pub use merge::ResultMap;
pub use protocol::DocRecord;
pub use queue::{BatchId, Queue};
