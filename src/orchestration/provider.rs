//! # Orchestrator Provider
//!
//! Entry point wiring the orchestrator families to one backend.
//!
//! ## Orchestrator types
//!
//! **Parallel orchestrators** execute worksets in no particular order. They
//! suit callers that handle ordering themselves: if work #2 must run after
//! work #1, the caller either submits both in one workset or waits for #1
//! before submitting #2. All parallel orchestrators of one provider share the
//! root's queue and consumer.
//!
//! **Serial orchestrators** execute worksets in submission order, each with a
//! dedicated queue and consumer. They suit per-index dispatch where many
//! threads submit worksets and the most recent workset is expected to carry
//! the most recent data. Ordering holds within one process only.
//!
//! In both families, works of one workset may share a bulk request with each
//! other and with works of other worksets, as long as everything between
//! them was bulked too.

use std::sync::Arc;

use tracing::info;

use crate::backend::{AggregateFactory, BackendClient, FailureSink};
use crate::config::OrchestratorConfig;
use crate::orchestration::orchestrator::{
    BatchingOrchestrator, ChildOrchestrator, OrchestratorError,
};
use crate::orchestration::processor::{ParallelWorkProcessor, SerialWorkProcessor};

/// Provides access to the orchestrators of one backend.
///
/// The provider owns the shared root parallel orchestrator, created at
/// construction and driven through [`start`](Self::start) /
/// [`pre_stop`](Self::pre_stop) / [`stop`](Self::stop). Serial orchestrators
/// are created on demand, one per logical target, and have their own
/// lifecycle.
pub struct OrchestratorProvider {
    client: Arc<dyn BackendClient>,
    aggregate_factory: Arc<dyn AggregateFactory>,
    failure_sink: Arc<dyn FailureSink>,
    root_parallel: BatchingOrchestrator,
}

impl OrchestratorProvider {
    pub fn new<N: Into<String>>(
        root_name: N,
        client: Arc<dyn BackendClient>,
        aggregate_factory: Arc<dyn AggregateFactory>,
        failure_sink: Arc<dyn FailureSink>,
    ) -> Self {
        let root_name = root_name.into();
        // The root parallel orchestrator maximizes throughput for callers
        // that already order their own submissions.
        let config = OrchestratorConfig::parallel();
        let processor = ParallelWorkProcessor::new(
            Arc::clone(&client),
            Arc::clone(&aggregate_factory),
            Arc::clone(&failure_sink),
            &config.bulk,
        );
        let root_parallel =
            BatchingOrchestrator::new(root_name.clone(), config, Box::new(processor));
        info!(root = %root_name, "orchestrator provider created");
        Self {
            client,
            aggregate_factory,
            failure_sink,
            root_parallel,
        }
    }

    /// Start the root parallel orchestrator.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        self.root_parallel.start()
    }

    /// Drain the root parallel orchestrator's queue; resolves once all
    /// previously queued worksets have fully processed.
    pub async fn pre_stop(&self) -> Result<(), OrchestratorError> {
        self.root_parallel.pre_stop().await
    }

    /// Halt the root parallel orchestrator's consumer.
    pub fn stop(&self) {
        self.root_parallel.stop()
    }

    /// The root parallel orchestrator. Useful for operations that outlive
    /// any single target's orchestrator, such as cleanup after a target is
    /// closed.
    pub fn root_parallel_orchestrator(&self) -> &BatchingOrchestrator {
        &self.root_parallel
    }

    /// Create a dedicated serial orchestrator. Returned in CREATED state;
    /// the caller starts and stops it.
    pub fn create_serial_orchestrator<N: Into<String>>(&self, name: N) -> BatchingOrchestrator {
        let config = OrchestratorConfig::serial();
        let processor = SerialWorkProcessor::new(
            Arc::clone(&self.client),
            Arc::clone(&self.aggregate_factory),
            Arc::clone(&self.failure_sink),
            &config.bulk,
        );
        BatchingOrchestrator::new(name.into(), config, Box::new(processor))
    }

    /// Create a parallel orchestrator: a named child sharing the root's
    /// queue and consumer.
    pub fn create_parallel_orchestrator<N: Into<String>>(&self, name: N) -> ChildOrchestrator {
        self.root_parallel.create_child(name)
    }
}
