//! # Work Sequence Builder
//!
//! Builds one linear chain of execution steps per batch and runs it.
//!
//! ## Overview
//!
//! The orchestrator's consumer compiles each batch into exactly one sequence:
//! individual executions, aggregate (bulk) executions, and per-item result
//! extractions from aggregate outcomes. Steps execute strictly in order
//! inside one task, so no locking is needed; mutual exclusion falls out of
//! the sequential composition.
//!
//! Skip propagation is a tagged outcome passed explicitly between steps
//! rather than an error unwound through the chain: when a work fails, its
//! workset's chain state carries the cause forward and later steps of that
//! workset resolve `Skipped` without executing. Chain state is tracked per
//! workset, so one caller's failure never bleeds into another caller's
//! workset within the same batch.
//!
//! Caller-visible outcome handles are the only channel for per-work results.
//! The sequence-completion signal returned by [`WorkSequenceBuilder::build`]
//! is a synchronization device for the orchestrator alone: successful
//! outcomes resolve once the batch's refresh flush has run, failures and
//! skips resolve immediately at their step, and none of them wait for the
//! completion signal itself.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::backend::{
    AggregateOutcome, AggregateWork, BackendClient, FailureSink, OrchestrationFailure,
};
use crate::orchestration::context::ExecutionContext;
use crate::work::{
    FailureCause, SubmittedBulkable, SubmittedWork, WorkError, WorkOutcome, WorkResult,
};

/// Completion signal of one sequence (or the prior stage a sequence is
/// chained after). Carries no result; the outcome of every work travels on
/// the work's own handle.
pub(crate) type SequenceSignal = Shared<BoxFuture<'static, ()>>;

/// An already-completed signal, for sequences that start immediately.
pub(crate) fn ready_signal() -> SequenceSignal {
    futures::future::ready(()).boxed().shared()
}

/// Identifies one workset within the sequence currently being built. Skip
/// propagation is scoped to this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorksetTag(usize);

/// Position of one aggregate execution within the sequence, used to attach
/// result-extraction steps to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BulkRef(usize);

enum Step {
    /// Execute one work individually.
    Execute {
        workset: WorksetTag,
        work: SubmittedWork,
    },
    /// Execute one aggregate request. The request object arrives through a
    /// channel because the bulker decides final membership after the step is
    /// registered.
    ExecuteAggregate {
        workset: WorksetTag,
        slot: usize,
        request: oneshot::Receiver<Box<dyn AggregateWork>>,
    },
    /// Extract one work's individual result from an aggregate outcome.
    ExtractItem {
        workset: WorksetTag,
        slot: usize,
        position: usize,
        work: SubmittedBulkable,
    },
}

enum SlotState {
    /// The aggregate step has not run yet.
    Pending,
    /// The aggregate was skipped because its opening workset's chain had
    /// already failed.
    Skipped(FailureCause),
    /// The aggregate request itself failed at the backend.
    BulkFailed(FailureCause),
    /// The aggregate executed and returned per-item results.
    Ready(AggregateOutcome),
}

struct BuildingSequence {
    prior: SequenceSignal,
    context: ExecutionContext,
    steps: Vec<Step>,
    worksets: usize,
    slots: usize,
}

/// Builds one linear chain of asynchronous steps per batch.
///
/// Usage per batch: `init`, then interleaved `begin_workset` /
/// `add_non_bulk_execution` / `add_bulk_execution` /
/// `add_bulk_result_extraction` calls, then `build` to obtain the sequence's
/// completion signal. `init` allocates a fresh [`ExecutionContext`] used by
/// this sequence only.
pub(crate) struct WorkSequenceBuilder {
    client: Arc<dyn BackendClient>,
    failure_sink: Arc<dyn FailureSink>,
    building: Option<BuildingSequence>,
}

impl WorkSequenceBuilder {
    pub(crate) fn new(client: Arc<dyn BackendClient>, failure_sink: Arc<dyn FailureSink>) -> Self {
        Self {
            client,
            failure_sink,
            building: None,
        }
    }

    /// Start a new sequence, chained after `prior`. The prior signal only
    /// delays the sequence's start; its result is ignored.
    pub(crate) fn init(&mut self, prior: SequenceSignal) {
        self.building = Some(BuildingSequence {
            prior,
            context: ExecutionContext::new(Arc::clone(&self.client)),
            steps: Vec::new(),
            worksets: 0,
            slots: 0,
        });
    }

    /// Open the next workset. Steps registered under the returned tag share
    /// skip-propagation state; a failure under one tag never skips steps
    /// registered under another.
    pub(crate) fn begin_workset(&mut self) -> WorksetTag {
        let building = self.building_mut();
        let tag = WorksetTag(building.worksets);
        building.worksets += 1;
        tag
    }

    /// Append an individual execution step.
    ///
    /// If the workset's chain has failed by the time this step runs, the work
    /// resolves `Skipped` with the originating cause and never executes. The
    /// work's own failure resolves its handle `Failed` and poisons the
    /// workset's chain for later steps.
    pub(crate) fn add_non_bulk_execution(&mut self, workset: WorksetTag, work: SubmittedWork) {
        self.building_mut()
            .steps
            .push(Step::Execute { workset, work });
    }

    /// Append an aggregate execution step, gated on the opening workset's
    /// chain state and on delivery of the aggregate request through
    /// `request`. The aggregate's own failure is not resolved here; each
    /// merged work learns its fate through its extraction step.
    pub(crate) fn add_bulk_execution(
        &mut self,
        workset: WorksetTag,
        request: oneshot::Receiver<Box<dyn AggregateWork>>,
    ) -> BulkRef {
        let building = self.building_mut();
        let slot = building.slots;
        building.slots += 1;
        building.steps.push(Step::ExecuteAggregate {
            workset,
            slot,
            request,
        });
        BulkRef(slot)
    }

    /// Start registering per-item result extractions for one aggregate.
    pub(crate) fn add_bulk_result_extraction(&mut self, bulk: BulkRef) -> BulkResultExtractionStep<'_> {
        BulkResultExtractionStep {
            builder: self,
            slot: bulk.0,
        }
    }

    /// Finalize the chain and return its completion signal.
    ///
    /// Running the sequence executes every step in order, then flushes the
    /// context's pending refreshes exactly once. Successful outcomes are
    /// buffered and resolve only after the refresh flush; failed and skipped
    /// outcomes resolve immediately at their step. Completion-time errors
    /// that cannot be attributed to a work's handle go to the failure sink.
    pub(crate) fn build(&mut self) -> SequenceSignal {
        let Some(building) = self.building.take() else {
            error!("sequence build requested without init; returning completed signal");
            return ready_signal();
        };
        let failure_sink = Arc::clone(&self.failure_sink);
        run_sequence(building, failure_sink).boxed().shared()
    }

    fn building_mut(&mut self) -> &mut BuildingSequence {
        self.building
            .as_mut()
            .expect("sequence builder used before init")
    }
}

/// Registers, for each work merged into one aggregate, the extraction of its
/// individual result by position.
pub(crate) struct BulkResultExtractionStep<'a> {
    builder: &'a mut WorkSequenceBuilder,
    slot: usize,
}

impl BulkResultExtractionStep<'_> {
    /// Register extraction of one merged work's result. `position` is the
    /// work's slot within the aggregate, in submission order.
    pub(crate) fn add(&mut self, workset: WorksetTag, work: SubmittedBulkable, position: usize) {
        let slot = self.slot;
        self.builder.building_mut().steps.push(Step::ExtractItem {
            workset,
            slot,
            position,
            work,
        });
    }
}

async fn run_sequence(building: BuildingSequence, failure_sink: Arc<dyn FailureSink>) {
    let BuildingSequence {
        prior,
        mut context,
        steps,
        worksets,
        slots,
    } = building;

    // The prior stage only delays the start; its own outcome is irrelevant.
    prior.await;

    let mut workset_failures: Vec<Option<FailureCause>> = vec![None; worksets];
    let mut slot_states: Vec<SlotState> = (0..slots).map(|_| SlotState::Pending).collect();
    let mut awaiting_refresh: Vec<(oneshot::Sender<WorkOutcome>, WorkResult)> = Vec::new();

    for step in steps {
        match step {
            Step::Execute { workset, work } => {
                if let Some(cause) = &workset_failures[workset.0] {
                    work.resolve(WorkOutcome::Skipped {
                        cause: Arc::clone(cause),
                    });
                    continue;
                }
                let SubmittedWork { item, outcome } = work;
                match item.execute(&mut context).await {
                    Ok(result) => awaiting_refresh.push((outcome, result)),
                    Err(work_error) => {
                        let cause: FailureCause = Arc::new(work_error);
                        debug!(error = %cause, "work failed; skipping the rest of its workset");
                        workset_failures[workset.0] = Some(Arc::clone(&cause));
                        let _ = outcome.send(WorkOutcome::Failed { cause });
                    }
                }
            }
            Step::ExecuteAggregate {
                workset,
                slot,
                request,
            } => {
                if let Some(cause) = &workset_failures[workset.0] {
                    slot_states[slot] = SlotState::Skipped(Arc::clone(cause));
                    continue;
                }
                let aggregate = match request.await {
                    Ok(aggregate) => aggregate,
                    Err(_) => {
                        let cause: FailureCause = Arc::new(WorkError::Internal(
                            "aggregate request was never supplied to its execution step".into(),
                        ));
                        failure_sink.handle(OrchestrationFailure::new(
                            "aggregate request delivery",
                            Arc::clone(&cause),
                        ));
                        slot_states[slot] = SlotState::BulkFailed(cause);
                        continue;
                    }
                };
                debug!(works = aggregate.len(), "executing aggregate request");
                match aggregate.execute(&mut context).await {
                    Ok(outcome) => slot_states[slot] = SlotState::Ready(outcome),
                    Err(work_error) => {
                        slot_states[slot] = SlotState::BulkFailed(Arc::new(work_error));
                    }
                }
            }
            Step::ExtractItem {
                workset,
                slot,
                position,
                work,
            } => match &slot_states[slot] {
                SlotState::Pending => {
                    let cause: FailureCause = Arc::new(WorkError::Internal(
                        "bulk result extraction ran before its aggregate".into(),
                    ));
                    failure_sink.handle(OrchestrationFailure::new(
                        "bulk result extraction",
                        Arc::clone(&cause),
                    ));
                    work.resolve(WorkOutcome::Failed { cause });
                }
                SlotState::Skipped(cause) => {
                    work.resolve(WorkOutcome::Skipped {
                        cause: Arc::clone(cause),
                    });
                }
                SlotState::BulkFailed(cause) => {
                    // The backend rejected the whole aggregate: the merged
                    // work failed, it was not skipped. The failure also
                    // poisons the work's own workset.
                    let wrapped: FailureCause = Arc::new(WorkError::BulkFailed {
                        cause: Arc::clone(cause),
                    });
                    workset_failures[workset.0] = Some(Arc::clone(&wrapped));
                    work.resolve(WorkOutcome::Failed { cause: wrapped });
                }
                SlotState::Ready(aggregate_outcome) => {
                    let SubmittedBulkable { work, outcome } = work;
                    match work.extract(&mut context, aggregate_outcome, position) {
                        Ok(result) => awaiting_refresh.push((outcome, result)),
                        Err(work_error) => {
                            let cause: FailureCause = Arc::new(work_error);
                            workset_failures[workset.0] = Some(Arc::clone(&cause));
                            let _ = outcome.send(WorkOutcome::Failed { cause });
                        }
                    }
                }
            },
        }
    }

    // Flush pending refreshes exactly once, then release the buffered
    // successes. Failed and skipped works were already resolved above.
    match context.execute_pending_refreshes().await {
        Ok(()) => {
            for (outcome, result) in awaiting_refresh {
                let _ = outcome.send(WorkOutcome::Success(result));
            }
        }
        Err(refresh_error) => {
            let cause: FailureCause = Arc::new(refresh_error);
            failure_sink.handle(OrchestrationFailure::new(
                "refresh flush at sequence completion",
                Arc::clone(&cause),
            ));
            let wrapped: FailureCause = Arc::new(WorkError::RefreshFailed { cause });
            for (outcome, _) in awaiting_refresh {
                let _ = outcome.send(WorkOutcome::Failed {
                    cause: Arc::clone(&wrapped),
                });
            }
        }
    }
}
