//! # Work Model
//!
//! Core vocabulary for units of work dispatched against a document search
//! backend: the [`Work`] and [`BulkableWork`] capability traits, the
//! [`Workset`] submission group, and the caller-visible outcome types.
//!
//! ## Overview
//!
//! A `Work` is one opaque asynchronous operation producing a single
//! [`WorkResult`]. Works that also implement [`BulkableWork`] can be merged
//! into one aggregate backend request and later have their individual result
//! re-extracted by position from the aggregate response.
//!
//! Callers never await works directly. Submitting a [`Workset`] to an
//! orchestrator yields one [`WorkHandle`] per work, resolved exactly once to a
//! [`WorkOutcome`] when the work has been executed, skipped, or failed.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::backend::AggregateOutcome;
use crate::orchestration::ExecutionContext;

/// Reference to one document in one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Index the document lives in
    pub index: String,

    /// Backend document identifier
    pub id: String,
}

impl DocumentRef {
    pub fn new<I: Into<String>, D: Into<String>>(index: I, id: D) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
        }
    }
}

/// Result reported by the backend for one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// Document the work targeted, when applicable
    pub document: Option<DocumentRef>,

    /// Backend response payload for this work
    pub payload: serde_json::Value,
}

impl WorkResult {
    /// Result for a document-targeted work.
    pub fn for_document(document: DocumentRef, payload: serde_json::Value) -> Self {
        Self {
            document: Some(document),
            payload,
        }
    }

    /// Result for a work with no single target document.
    pub fn untargeted(payload: serde_json::Value) -> Self {
        Self {
            document: None,
            payload,
        }
    }
}

/// Shared failure cause attached to skipped and failed outcomes.
///
/// Causes are reference-counted because one failure can resolve many
/// outcomes: a failed aggregate marks every merged work, and a failed work
/// marks every later work in its workset.
pub type FailureCause = Arc<WorkError>;

/// Errors raised while executing works against the backend.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("backend call failed: {0}")]
    Backend(String),

    #[error("bulk response has no item at position {position}")]
    MissingBulkItem { position: usize },

    #[error("bulk item at position {position} rejected with status {status}: {reason}")]
    ItemRejected {
        position: usize,
        status: u16,
        reason: String,
    },

    #[error("bulk request failed: {cause}")]
    BulkFailed { cause: FailureCause },

    #[error("index refresh failed after execution: {cause}")]
    RefreshFailed { cause: FailureCause },

    #[error("orchestrator stopped before the work completed")]
    Shutdown,

    #[error("internal orchestration defect: {0}")]
    Internal(String),
}

/// Terminal outcome of one submitted work.
///
/// Every submitted work resolves to exactly one of these variants.
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    /// The work executed and the backend acknowledged it. When the work wrote
    /// to an index, the result is only delivered once the batch's pending
    /// refreshes have been flushed.
    Success(WorkResult),

    /// The work was never executed because an earlier work in the same
    /// workset (or the aggregate it was merged into) failed first.
    Skipped { cause: FailureCause },

    /// The work executed and failed, or the aggregate carrying it failed.
    Failed { cause: FailureCause },
}

impl WorkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkOutcome::Success(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, WorkOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WorkOutcome::Failed { .. })
    }
}

/// One opaque asynchronous operation against the search backend.
#[async_trait]
pub trait Work: Send + Sync + Debug {
    /// Execute this work against the sequence's execution context.
    ///
    /// Works that write must register the touched index on the context so the
    /// batch flushes a refresh for it exactly once.
    async fn execute(&self, context: &mut ExecutionContext) -> Result<WorkResult, WorkError>;
}

/// A work that can be merged into one aggregate backend request.
pub trait BulkableWork: Work {
    /// This work's contribution to the aggregate request payload, in wire
    /// order. Aggregate item order equals submission order.
    fn bulk_action(&self) -> serde_json::Value;

    /// Decode this work's individual result from the aggregate response.
    ///
    /// `position` is the work's slot within the aggregate, assigned by the
    /// bulker in submission order. A per-item backend rejection surfaces as
    /// an error here and fails only this work.
    fn extract(
        &self,
        context: &mut ExecutionContext,
        outcome: &AggregateOutcome,
        position: usize,
    ) -> Result<WorkResult, WorkError>;
}

/// One entry of a workset: an individually-executed work or a bulk-eligible
/// work the bulker may merge into an aggregate request.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Single(Arc<dyn Work>),
    Bulkable(Arc<dyn BulkableWork>),
}

impl WorkItem {
    /// Execute the work individually, whether or not it is bulk-eligible.
    /// Bulk-eligible works run individually when the bulker decides an
    /// accumulator is too small to justify an aggregate request.
    pub(crate) async fn execute(
        &self,
        context: &mut ExecutionContext,
    ) -> Result<WorkResult, WorkError> {
        match self {
            WorkItem::Single(work) => work.execute(context).await,
            WorkItem::Bulkable(work) => work.execute(context).await,
        }
    }
}

/// Caller-submitted ordered group of works.
///
/// The workset is the ordering-contract boundary: its works execute (or are
/// skipped) in exactly this relative order, regardless of how the bulker
/// merges them into aggregate requests.
#[derive(Debug, Default)]
pub struct Workset {
    works: Vec<WorkItem>,
}

impl Workset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workset containing a single work.
    pub fn single(work: Arc<dyn Work>) -> Self {
        let mut workset = Self::new();
        workset.push(work);
        workset
    }

    /// Workset containing a single bulk-eligible work.
    pub fn single_bulkable(work: Arc<dyn BulkableWork>) -> Self {
        let mut workset = Self::new();
        workset.push_bulkable(work);
        workset
    }

    /// Append a work that always executes individually.
    pub fn push(&mut self, work: Arc<dyn Work>) {
        self.works.push(WorkItem::Single(work));
    }

    /// Append a bulk-eligible work.
    pub fn push_bulkable(&mut self, work: Arc<dyn BulkableWork>) {
        self.works.push(WorkItem::Bulkable(work));
    }

    pub fn len(&self) -> usize {
        self.works.len()
    }

    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }

    pub(crate) fn into_works(self) -> Vec<WorkItem> {
        self.works
    }
}

/// Caller-side receiver for one work's terminal outcome.
///
/// The handle resolves exactly once. If the orchestrator is stopped forcibly
/// while the work is still queued or in flight, the handle resolves to
/// [`WorkOutcome::Failed`] with [`WorkError::Shutdown`] instead of hanging.
#[derive(Debug)]
pub struct WorkHandle {
    receiver: oneshot::Receiver<WorkOutcome>,
}

impl WorkHandle {
    pub(crate) fn new(receiver: oneshot::Receiver<WorkOutcome>) -> Self {
        Self { receiver }
    }

    /// Wait for the work's terminal outcome.
    pub async fn outcome(self) -> WorkOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => WorkOutcome::Failed {
                cause: Arc::new(WorkError::Shutdown),
            },
        }
    }
}

/// A work travelling through the orchestrator together with the sender half
/// of its caller's outcome handle.
#[derive(Debug)]
pub(crate) struct SubmittedWork {
    pub(crate) item: WorkItem,
    pub(crate) outcome: oneshot::Sender<WorkOutcome>,
}

impl SubmittedWork {
    /// Resolve the caller's handle. A dropped handle is not an error.
    pub(crate) fn resolve(self, outcome: WorkOutcome) {
        let _ = self.outcome.send(outcome);
    }
}

/// A bulk-eligible work travelling through the bulker together with the
/// sender half of its caller's outcome handle.
#[derive(Debug)]
pub(crate) struct SubmittedBulkable {
    pub(crate) work: Arc<dyn BulkableWork>,
    pub(crate) outcome: oneshot::Sender<WorkOutcome>,
}

impl SubmittedBulkable {
    /// Resolve the caller's handle. A dropped handle is not an error.
    pub(crate) fn resolve(self, outcome: WorkOutcome) {
        let _ = self.outcome.send(outcome);
    }

    /// Repackage for individual execution when the bulker falls back below
    /// the minimum bulk size.
    pub(crate) fn into_single(self) -> SubmittedWork {
        SubmittedWork {
            item: WorkItem::Bulkable(self.work),
            outcome: self.outcome,
        }
    }
}

/// An ordered workset travelling through the submission queue.
#[derive(Debug)]
pub(crate) struct SubmittedWorkset {
    pub(crate) works: Vec<SubmittedWork>,
}

impl SubmittedWorkset {
    /// Split a caller workset into its queue representation and the caller's
    /// outcome handles, one per work, in submission order.
    pub(crate) fn from_workset(workset: Workset) -> (Self, Vec<WorkHandle>) {
        let mut works = Vec::with_capacity(workset.len());
        let mut handles = Vec::with_capacity(workset.len());
        for item in workset.into_works() {
            let (tx, rx) = oneshot::channel();
            works.push(SubmittedWork { item, outcome: tx });
            handles.push(WorkHandle::new(rx));
        }
        (Self { works }, handles)
    }
}
