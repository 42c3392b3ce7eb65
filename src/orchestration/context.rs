//! Per-sequence execution context.
//!
//! One context is allocated for each batch's execution sequence and dropped
//! with it. It binds the sequence to a backend client and collects the
//! indexes that received writes, so the sequence can flush one refresh per
//! touched index at completion. Contexts are never shared or reused across
//! concurrently-building sequences.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::backend::BackendClient;
use crate::work::WorkError;

/// Per-sequence resource holder: backend client binding plus the set of
/// indexes whose writes still need a refresh.
#[derive(Debug)]
pub struct ExecutionContext {
    client: Arc<dyn BackendClient>,
    dirty_indexes: BTreeSet<String>,
}

impl ExecutionContext {
    pub(crate) fn new(client: Arc<dyn BackendClient>) -> Self {
        Self {
            client,
            dirty_indexes: BTreeSet::new(),
        }
    }

    /// The backend client this sequence executes against.
    pub fn client(&self) -> Arc<dyn BackendClient> {
        Arc::clone(&self.client)
    }

    /// Mark an index as written, so the sequence refreshes it once at
    /// completion. Registering the same index repeatedly coalesces into a
    /// single refresh.
    pub fn register_index_needing_refresh<I: Into<String>>(&mut self, index: I) {
        self.dirty_indexes.insert(index.into());
    }

    /// Number of indexes currently awaiting a refresh.
    pub fn pending_refresh_count(&self) -> usize {
        self.dirty_indexes.len()
    }

    /// Flush all pending refreshes in one backend call. Called exactly once
    /// per sequence, at completion; a no-op when nothing was written.
    pub(crate) async fn execute_pending_refreshes(&mut self) -> Result<(), WorkError> {
        if self.dirty_indexes.is_empty() {
            return Ok(());
        }
        let indexes: Vec<String> = std::mem::take(&mut self.dirty_indexes)
            .into_iter()
            .collect();
        debug!(count = indexes.len(), "flushing pending index refreshes");
        self.client.refresh(&indexes).await
    }
}
