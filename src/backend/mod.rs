//! # Backend Capabilities
//!
//! Narrow capability traits through which the orchestration core talks to a
//! document search backend. The wire protocol, payload serialization, and
//! index lifecycle all live behind these seams; the core only ever composes
//! and sequences calls.
//!
//! - [`BackendClient`]: one single-operation request, one bulk request, and
//!   the refresh call making recent writes visible.
//! - [`AggregateFactory`] / [`AggregateWork`]: construction and execution of
//!   one merged request from an ordered run of bulk-eligible works.
//! - [`AggregateOutcome`]: the bulk response, queryable per item by position.
//! - [`FailureSink`]: process-wide receiver for unexpected errors that cannot
//!   be attributed to any single caller's outcome handle.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::orchestration::ExecutionContext;
use crate::work::{BulkableWork, FailureCause, WorkError};

/// Client capability for one search backend.
///
/// Implementations own connection management, serialization, and any
/// transport-level retry/timeout policy. The orchestration core never
/// retries.
#[async_trait]
pub trait BackendClient: Send + Sync + Debug {
    /// Execute one single-operation request.
    async fn request(&self, body: serde_json::Value) -> Result<serde_json::Value, WorkError>;

    /// Execute one bulk request carrying `actions` in order and decode the
    /// per-item results, preserving positions.
    async fn bulk(&self, actions: Vec<serde_json::Value>) -> Result<AggregateOutcome, WorkError>;

    /// Make recent writes to the given indexes visible to searches.
    async fn refresh(&self, indexes: &[String]) -> Result<(), WorkError>;
}

/// Result of one item inside a bulk response.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemResult {
    /// Backend status code for this item
    pub status: u16,

    /// Backend response fragment for this item
    pub body: serde_json::Value,
}

impl BulkItemResult {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The single result of one merged bulk request.
///
/// Item order equals the order in which works were merged, which equals
/// submission order; lookup is by position.
#[derive(Debug, Clone, Default)]
pub struct AggregateOutcome {
    items: Vec<BulkItemResult>,
}

impl AggregateOutcome {
    pub fn new(items: Vec<BulkItemResult>) -> Self {
        Self { items }
    }

    /// The item at `position`, or `None` when the backend returned fewer
    /// items than were sent.
    pub fn item(&self, position: usize) -> Option<&BulkItemResult> {
        self.items.get(position)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One merged backend request, ready to execute.
#[async_trait]
pub trait AggregateWork: Send + Sync + Debug {
    /// Execute the merged request against the sequence's execution context.
    async fn execute(&self, context: &mut ExecutionContext)
        -> Result<AggregateOutcome, WorkError>;

    /// Number of merged works.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backend-specific construction of one bulk request from an ordered run of
/// bulk-eligible works.
pub trait AggregateFactory: Send + Sync {
    fn build(&self, works: &[Arc<dyn BulkableWork>]) -> Box<dyn AggregateWork>;
}

/// Default aggregate factory: collects each work's bulk action in order and
/// submits them through [`BackendClient::bulk`].
#[derive(Debug, Default, Clone)]
pub struct BulkRequestFactory;

impl AggregateFactory for BulkRequestFactory {
    fn build(&self, works: &[Arc<dyn BulkableWork>]) -> Box<dyn AggregateWork> {
        Box::new(BulkRequest {
            actions: works.iter().map(|work| work.bulk_action()).collect(),
        })
    }
}

#[derive(Debug)]
struct BulkRequest {
    actions: Vec<serde_json::Value>,
}

#[async_trait]
impl AggregateWork for BulkRequest {
    async fn execute(
        &self,
        context: &mut ExecutionContext,
    ) -> Result<AggregateOutcome, WorkError> {
        context.client().bulk(self.actions.clone()).await
    }

    fn len(&self) -> usize {
        self.actions.len()
    }
}

/// An error that could not be attributed to any single work's outcome handle.
#[derive(Debug, Clone)]
pub struct OrchestrationFailure {
    /// What the orchestrator was doing when the error surfaced
    pub operation: String,

    /// The error itself
    pub error: FailureCause,
}

impl OrchestrationFailure {
    pub fn new<O: Into<String>>(operation: O, error: FailureCause) -> Self {
        Self {
            operation: operation.into(),
            error,
        }
    }
}

/// Process-wide sink for unexpected orchestration errors.
///
/// All genuine work-level errors are resolved on the affected works' own
/// handles; anything reaching this sink indicates either an infrastructure
/// failure (a refresh flush that failed after works already succeeded) or an
/// orchestration defect.
pub trait FailureSink: Send + Sync + Debug {
    fn handle(&self, failure: OrchestrationFailure);
}

/// Default sink: reports failures through structured logging.
#[derive(Debug, Default, Clone)]
pub struct LoggingFailureSink;

impl FailureSink for LoggingFailureSink {
    fn handle(&self, failure: OrchestrationFailure) {
        error!(
            operation = %failure.operation,
            error = %failure.error,
            "unexpected orchestration failure"
        );
    }
}
