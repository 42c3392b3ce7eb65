//! Shared test stubs for unit and integration tests.
//!
//! Provides a scriptable in-memory backend that records every call it
//! receives, plus stub works wired to it. Failure behavior is scripted
//! through the work payloads (per-work and per-item failures) or on the
//! backend itself (whole-bulk and refresh failures).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{
    AggregateOutcome, BackendClient, BulkItemResult, FailureSink, OrchestrationFailure,
};
use crate::orchestration::ExecutionContext;
use crate::work::{BulkableWork, DocumentRef, Work, WorkError, WorkResult};

/// In-memory backend recording every call in arrival order.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    fail_next_bulk: Mutex<Option<String>>,
    fail_next_refresh: Mutex<Option<String>>,
    single_delay: Mutex<Option<Duration>>,
}

#[derive(Debug, Clone)]
enum BackendCall {
    Single { label: String },
    Bulk { labels: Vec<String> },
    Refresh { indexes: Vec<String> },
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next bulk call to fail as a whole.
    pub fn fail_next_bulk<M: Into<String>>(&self, message: M) {
        *self.fail_next_bulk.lock() = Some(message.into());
    }

    /// Script the next refresh call to fail.
    pub fn fail_next_refresh<M: Into<String>>(&self, message: M) {
        *self.fail_next_refresh.lock() = Some(message.into());
    }

    /// Delay every single-operation request, to hold a consumer in flight.
    pub fn delay_single_calls(&self, delay: Duration) {
        *self.single_delay.lock() = Some(delay);
    }

    /// Labels of single-operation requests, in arrival order.
    pub fn single_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Single { label } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Item labels of each bulk request, in arrival order.
    pub fn bulk_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Bulk { labels } => Some(labels.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index lists of each refresh call, in arrival order.
    pub fn refresh_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::Refresh { indexes } => Some(indexes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every call formatted compactly, in arrival order.
    pub fn call_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|call| match call {
                BackendCall::Single { label } => format!("single:{label}"),
                BackendCall::Bulk { labels } => format!("bulk:{}", labels.join(",")),
                BackendCall::Refresh { indexes } => format!("refresh:{}", indexes.join(",")),
            })
            .collect()
    }
}

fn label_of(body: &serde_json::Value) -> String {
    body.get("label")
        .and_then(|label| label.as_str())
        .unwrap_or("unlabeled")
        .to_string()
}

#[async_trait]
impl BackendClient for RecordingBackend {
    async fn request(&self, body: serde_json::Value) -> Result<serde_json::Value, WorkError> {
        let delay = *self.single_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let label = label_of(&body);
        self.calls.lock().push(BackendCall::Single { label });
        if let Some(message) = body.get("error").and_then(|error| error.as_str()) {
            return Err(WorkError::Backend(message.to_string()));
        }
        Ok(serde_json::json!({ "acknowledged": true }))
    }

    async fn bulk(&self, actions: Vec<serde_json::Value>) -> Result<AggregateOutcome, WorkError> {
        let labels: Vec<String> = actions.iter().map(label_of).collect();
        self.calls.lock().push(BackendCall::Bulk { labels });
        if let Some(message) = self.fail_next_bulk.lock().take() {
            return Err(WorkError::Backend(message));
        }
        let items = actions
            .iter()
            .map(|action| {
                if action.get("reject").and_then(|reject| reject.as_bool()) == Some(true) {
                    BulkItemResult {
                        status: 500,
                        body: serde_json::json!({ "error": "rejected by backend" }),
                    }
                } else {
                    BulkItemResult {
                        status: 200,
                        body: serde_json::json!({ "acknowledged": true }),
                    }
                }
            })
            .collect();
        Ok(AggregateOutcome::new(items))
    }

    async fn refresh(&self, indexes: &[String]) -> Result<(), WorkError> {
        self.calls.lock().push(BackendCall::Refresh {
            indexes: indexes.to_vec(),
        });
        if let Some(message) = self.fail_next_refresh.lock().take() {
            return Err(WorkError::Backend(message));
        }
        Ok(())
    }
}

/// Failure sink collecting everything it receives, for assertions.
#[derive(Debug, Default)]
pub struct CollectingFailureSink {
    failures: Mutex<Vec<OrchestrationFailure>>,
}

impl CollectingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<OrchestrationFailure> {
        self.failures.lock().clone()
    }
}

impl FailureSink for CollectingFailureSink {
    fn handle(&self, failure: OrchestrationFailure) {
        self.failures.lock().push(failure);
    }
}

/// Individually-executed stub work.
#[derive(Debug, Clone)]
pub struct StubWork {
    label: String,
    index: Option<String>,
    error: Option<String>,
}

impl StubWork {
    pub fn succeeding<L: Into<String>>(label: L) -> Self {
        Self {
            label: label.into(),
            index: None,
            error: None,
        }
    }

    pub fn failing<L: Into<String>, M: Into<String>>(label: L, message: M) -> Self {
        Self {
            label: label.into(),
            index: None,
            error: Some(message.into()),
        }
    }

    /// Mark the work as writing to `index`, so it registers a pending
    /// refresh on success.
    pub fn writing_to<I: Into<String>>(mut self, index: I) -> Self {
        self.index = Some(index.into());
        self
    }

    fn request_body(&self) -> serde_json::Value {
        match &self.error {
            Some(message) => serde_json::json!({ "label": self.label, "error": message }),
            None => serde_json::json!({ "label": self.label }),
        }
    }

    fn result(&self, payload: serde_json::Value) -> WorkResult {
        match &self.index {
            Some(index) => {
                WorkResult::for_document(DocumentRef::new(index.clone(), self.label.clone()), payload)
            }
            None => WorkResult::untargeted(payload),
        }
    }
}

#[async_trait]
impl Work for StubWork {
    async fn execute(&self, context: &mut ExecutionContext) -> Result<WorkResult, WorkError> {
        let payload = context.client().request(self.request_body()).await?;
        if let Some(index) = &self.index {
            context.register_index_needing_refresh(index.clone());
        }
        Ok(self.result(payload))
    }
}

/// Bulk-eligible stub work.
#[derive(Debug, Clone)]
pub struct StubBulkableWork {
    label: String,
    index: Option<String>,
    reject_in_bulk: bool,
}

impl StubBulkableWork {
    pub fn succeeding<L: Into<String>>(label: L) -> Self {
        Self {
            label: label.into(),
            index: None,
            reject_in_bulk: false,
        }
    }

    /// Script the backend to reject this work's item inside a bulk response
    /// while the bulk call itself succeeds.
    pub fn rejected_in_bulk<L: Into<String>>(label: L) -> Self {
        Self {
            label: label.into(),
            index: None,
            reject_in_bulk: true,
        }
    }

    /// Mark the work as writing to `index`, so it registers a pending
    /// refresh when its result is extracted (or when executed individually).
    pub fn writing_to<I: Into<String>>(mut self, index: I) -> Self {
        self.index = Some(index.into());
        self
    }

    fn result(&self, payload: serde_json::Value) -> WorkResult {
        match &self.index {
            Some(index) => {
                WorkResult::for_document(DocumentRef::new(index.clone(), self.label.clone()), payload)
            }
            None => WorkResult::untargeted(payload),
        }
    }
}

#[async_trait]
impl Work for StubBulkableWork {
    async fn execute(&self, context: &mut ExecutionContext) -> Result<WorkResult, WorkError> {
        let payload = context
            .client()
            .request(serde_json::json!({ "label": self.label }))
            .await?;
        if let Some(index) = &self.index {
            context.register_index_needing_refresh(index.clone());
        }
        Ok(self.result(payload))
    }
}

impl BulkableWork for StubBulkableWork {
    fn bulk_action(&self) -> serde_json::Value {
        serde_json::json!({ "label": self.label, "reject": self.reject_in_bulk })
    }

    fn extract(
        &self,
        context: &mut ExecutionContext,
        outcome: &AggregateOutcome,
        position: usize,
    ) -> Result<WorkResult, WorkError> {
        let item = outcome
            .item(position)
            .ok_or(WorkError::MissingBulkItem { position })?;
        if !item.is_ok() {
            return Err(WorkError::ItemRejected {
                position,
                status: item.status,
                reason: item
                    .body
                    .get("error")
                    .and_then(|error| error.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        if let Some(index) = &self.index {
            context.register_index_needing_refresh(index.clone());
        }
        Ok(self.result(item.body.clone()))
    }
}

