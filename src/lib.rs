#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Searchwork Core
//!
//! High-performance Rust core for dispatching work against document search
//! backends with single-item and bulk request endpoints.
//!
//! ## Overview
//!
//! The engine accepts units of work from many concurrent callers, preserves
//! the ordering guarantee each caller was promised, opportunistically merges
//! consecutive compatible works into bulk requests to maximize throughput,
//! and resolves every work's outcome independently, even when the work was
//! physically executed as part of a larger aggregate request.
//!
//! ## Architecture
//!
//! ```text
//! caller ─▶ submit(workset) ─▶ queue ─▶ consumer ─▶ bulker ─▶ sequence
//!               │                          │  batches           │ chain
//!               ▼                          ▼                    ▼
//!        Vec<WorkHandle> ◀──────── outcomes ◀────────── backend calls
//! ```
//!
//! Three constraints hold simultaneously: per-caller ordering, all-or-nothing
//! bulk failure semantics, and aggressive batching. All of it is built from
//! asynchronous composition only, with no step-level locks.
//!
//! ## Module Organization
//!
//! - [`work`] - Work model: work traits, worksets, outcomes, handles
//! - [`backend`] - Backend capability seams: client, aggregates, failure sink
//! - [`orchestration`] - Orchestrators, provider, and execution sequencing
//! - [`config`] - Tuning configuration for both orchestrator families
//! - [`logging`] - Structured logging initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use searchwork_core::backend::{BulkRequestFactory, LoggingFailureSink};
//! use searchwork_core::orchestration::OrchestratorProvider;
//! use searchwork_core::work::Workset;
//!
//! # async fn example(client: Arc<dyn searchwork_core::backend::BackendClient>) {
//! let provider = OrchestratorProvider::new(
//!     "backend-root",
//!     client,
//!     Arc::new(BulkRequestFactory),
//!     Arc::new(LoggingFailureSink),
//! );
//! provider.start().unwrap();
//!
//! let orchestrator = provider.create_parallel_orchestrator("index-books");
//! # let workset = Workset::new();
//! let handles = orchestrator.submit(workset).await.unwrap();
//! for handle in handles {
//!     println!("{:?}", handle.outcome().await);
//! }
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod logging;
pub mod orchestration;
pub mod test_support;
pub mod work;

pub use backend::{
    AggregateFactory, AggregateOutcome, AggregateWork, BackendClient, BulkItemResult,
    BulkRequestFactory, FailureSink, LoggingFailureSink, OrchestrationFailure,
};
pub use config::{BulkConfig, OrchestratorConfig};
pub use orchestration::{
    BatchingOrchestrator, ChildOrchestrator, ExecutionContext, OrchestratorError,
    OrchestratorProvider, OrchestratorState, OrchestratorStats,
};
pub use work::{
    BulkableWork, DocumentRef, FailureCause, Work, WorkError, WorkHandle, WorkOutcome, WorkResult,
    Workset,
};
