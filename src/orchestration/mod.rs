//! # Orchestration Engine
//!
//! Work orchestration and bulking core: accepts worksets from many
//! concurrent callers, preserves each caller's ordering contract, merges
//! contiguous bulk-eligible works into aggregate requests for throughput,
//! and resolves every work's outcome independently.
//!
//! ## Core Components
//!
//! - **BatchingOrchestrator**: submission queue, background consumer, and
//!   lifecycle control; one per resource group
//! - **OrchestratorProvider**: wires orchestrator families to one backend,
//!   a shared root parallel orchestrator plus serial orchestrators on demand
//! - **WorkSequenceBuilder**: compiles one batch into one linear chain of
//!   execution, aggregation, and extraction steps (internal)
//! - **WorkBulker**: greedy accumulation of contiguous bulk-eligible works
//!   into bounded aggregate requests (internal)
//! - **ExecutionContext**: per-sequence backend binding and refresh
//!   bookkeeping
//!
//! All sequencing is achieved through asynchronous composition: each batch
//! executes inside one task, and the consumer awaits a batch's completion
//! before draining the next. No step-level locking exists anywhere in the
//! engine.

mod bulker;
mod context;
mod orchestrator;
mod processor;
mod provider;
mod sequence;

pub use context::ExecutionContext;
pub use orchestrator::{
    BatchingOrchestrator, ChildOrchestrator, OrchestratorError, OrchestratorState,
    OrchestratorStats,
};
pub use provider::OrchestratorProvider;
