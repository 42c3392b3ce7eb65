//! # Work Processors
//!
//! Per-batch composition: a processor walks the worksets of one batch,
//! routes bulk-eligible works through the bulker and everything else
//! straight to the sequence builder, and returns the composed sequence's
//! completion signal.
//!
//! The serial and parallel variants drive the identical composition; they
//! differ only in which worksets they are ever handed and in how consecutive
//! batches chain. The serial variant is fed strictly-ordered worksets from
//! one dedicated queue and starts each batch's sequence only after the
//! previous batch's sequence (including its refresh flush) has completed.
//! The parallel variant is fed worksets from many independent producers
//! through one shared queue; only within-workset order is meaningful there,
//! so its sequences start as soon as the consumer reaches them.

use std::sync::Arc;

use crate::backend::{AggregateFactory, BackendClient, FailureSink};
use crate::config::BulkConfig;
use crate::orchestration::bulker::WorkBulker;
use crate::orchestration::sequence::{ready_signal, SequenceSignal, WorkSequenceBuilder};
use crate::work::{SubmittedBulkable, SubmittedWork, SubmittedWorkset, WorkItem};

/// Compiles one batch of worksets into a single execution sequence.
pub(crate) trait WorkProcessor: Send {
    /// Compose the batch's pipeline and return its completion signal. The
    /// returned signal completes once every step has run and the batch's
    /// pending refreshes have been flushed.
    fn process_batch(&mut self, batch: Vec<SubmittedWorkset>) -> SequenceSignal;
}

/// Processor for serial orchestrators: batches execute strictly one after
/// another, each chained after the previous batch's completion signal.
pub(crate) struct SerialWorkProcessor {
    sequence_builder: WorkSequenceBuilder,
    bulker: WorkBulker,
    previous: SequenceSignal,
}

impl SerialWorkProcessor {
    pub(crate) fn new(
        client: Arc<dyn BackendClient>,
        factory: Arc<dyn AggregateFactory>,
        failure_sink: Arc<dyn FailureSink>,
        bulk: &BulkConfig,
    ) -> Self {
        Self {
            sequence_builder: WorkSequenceBuilder::new(client, failure_sink),
            bulker: WorkBulker::new(factory, bulk),
            previous: ready_signal(),
        }
    }
}

impl WorkProcessor for SerialWorkProcessor {
    fn process_batch(&mut self, batch: Vec<SubmittedWorkset>) -> SequenceSignal {
        self.sequence_builder.init(self.previous.clone());
        compose_batch(&mut self.sequence_builder, &mut self.bulker, batch);
        let signal = self.sequence_builder.build();
        self.previous = signal.clone();
        signal
    }
}

/// Processor for the parallel family: batches start immediately; ordering
/// across worksets is whatever arrival timing produced.
pub(crate) struct ParallelWorkProcessor {
    sequence_builder: WorkSequenceBuilder,
    bulker: WorkBulker,
}

impl ParallelWorkProcessor {
    pub(crate) fn new(
        client: Arc<dyn BackendClient>,
        factory: Arc<dyn AggregateFactory>,
        failure_sink: Arc<dyn FailureSink>,
        bulk: &BulkConfig,
    ) -> Self {
        Self {
            sequence_builder: WorkSequenceBuilder::new(client, failure_sink),
            bulker: WorkBulker::new(factory, bulk),
        }
    }
}

impl WorkProcessor for ParallelWorkProcessor {
    fn process_batch(&mut self, batch: Vec<SubmittedWorkset>) -> SequenceSignal {
        self.sequence_builder.init(ready_signal());
        compose_batch(&mut self.sequence_builder, &mut self.bulker, batch);
        self.sequence_builder.build()
    }
}

/// Walk the batch in order: bulk-eligible works extend the open accumulator,
/// anything else flushes it first and registers individually. The trailing
/// accumulator flushes at batch end.
fn compose_batch(
    sequence: &mut WorkSequenceBuilder,
    bulker: &mut WorkBulker,
    batch: Vec<SubmittedWorkset>,
) {
    for workset in batch {
        let tag = sequence.begin_workset();
        for work in workset.works {
            let SubmittedWork { item, outcome } = work;
            match item {
                WorkItem::Bulkable(bulkable) => bulker.add(
                    sequence,
                    tag,
                    SubmittedBulkable {
                        work: bulkable,
                        outcome,
                    },
                ),
                item => {
                    bulker.flush(sequence);
                    sequence.add_non_bulk_execution(tag, SubmittedWork { item, outcome });
                }
            }
        }
    }
    bulker.flush(sequence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BulkRequestFactory, LoggingFailureSink};
    use crate::test_support::{RecordingBackend, StubBulkableWork, StubWork};
    use crate::work::{WorkHandle, Workset};

    fn processor_parts(
        backend: &Arc<RecordingBackend>,
    ) -> (
        Arc<dyn BackendClient>,
        Arc<dyn AggregateFactory>,
        Arc<dyn FailureSink>,
    ) {
        (
            Arc::clone(backend) as Arc<dyn BackendClient>,
            Arc::new(BulkRequestFactory),
            Arc::new(LoggingFailureSink),
        )
    }

    fn submit(workset: Workset) -> (SubmittedWorkset, Vec<WorkHandle>) {
        SubmittedWorkset::from_workset(workset)
    }

    #[tokio::test]
    async fn mixed_batch_preserves_submission_order() {
        let backend = Arc::new(RecordingBackend::new());
        let (client, factory, sink) = processor_parts(&backend);
        let mut processor = SerialWorkProcessor::new(client, factory, sink, &BulkConfig::serial());

        let mut workset = Workset::new();
        workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("a")));
        workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("b")));
        workset.push(Arc::new(StubWork::succeeding("c")));
        workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("d")));
        let (submitted, handles) = submit(workset);

        processor.process_batch(vec![submitted]).await;

        for handle in handles {
            assert!(handle.outcome().await.is_success());
        }
        // a and b merged; d's singleton run fell under the serial minimum.
        assert_eq!(
            backend.call_order(),
            vec![
                "bulk:a,b".to_string(),
                "single:c".to_string(),
                "single:d".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn aggregates_merge_across_worksets_in_one_batch() {
        let backend = Arc::new(RecordingBackend::new());
        let (client, factory, sink) = processor_parts(&backend);
        let mut processor =
            ParallelWorkProcessor::new(client, factory, sink, &BulkConfig::parallel());

        let (first, first_handles) = submit(Workset::single_bulkable(Arc::new(
            StubBulkableWork::succeeding("a"),
        )));
        let (second, second_handles) = submit(Workset::single_bulkable(Arc::new(
            StubBulkableWork::succeeding("b"),
        )));

        processor.process_batch(vec![first, second]).await;

        for handle in first_handles.into_iter().chain(second_handles) {
            assert!(handle.outcome().await.is_success());
        }
        assert_eq!(
            backend.bulk_calls(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[tokio::test]
    async fn serial_batches_chain_in_order() {
        let backend = Arc::new(RecordingBackend::new());
        let (client, factory, sink) = processor_parts(&backend);
        let mut processor = SerialWorkProcessor::new(client, factory, sink, &BulkConfig::serial());

        let (first, first_handles) =
            submit(Workset::single(Arc::new(StubWork::succeeding("a").writing_to("books"))));
        let (second, second_handles) =
            submit(Workset::single(Arc::new(StubWork::succeeding("b"))));

        let first_signal = processor.process_batch(vec![first]);
        let second_signal = processor.process_batch(vec![second]);
        futures::future::join(first_signal, second_signal).await;

        for handle in first_handles.into_iter().chain(second_handles) {
            assert!(handle.outcome().await.is_success());
        }
        // The second batch ran only after the first one's refresh flush.
        assert_eq!(
            backend.call_order(),
            vec![
                "single:a".to_string(),
                "refresh:books".to_string(),
                "single:b".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn cross_workset_failures_stay_contained() {
        let backend = Arc::new(RecordingBackend::new());
        let (client, factory, sink) = processor_parts(&backend);
        let mut processor = SerialWorkProcessor::new(client, factory, sink, &BulkConfig::serial());

        let (first, first_handles) =
            submit(Workset::single(Arc::new(StubWork::failing("a", "boom"))));
        let (second, second_handles) =
            submit(Workset::single(Arc::new(StubWork::succeeding("b"))));

        processor.process_batch(vec![first, second]).await;

        for handle in first_handles {
            assert!(handle.outcome().await.is_failed());
        }
        for handle in second_handles {
            assert!(handle.outcome().await.is_success());
        }
    }

    #[tokio::test]
    async fn bulk_eligible_works_skip_after_an_earlier_failure() {
        // A failing non-bulk work ahead of bulk-eligible works must skip
        // them even though they would otherwise have merged into a bulk.
        let backend = Arc::new(RecordingBackend::new());
        let (client, factory, sink) = processor_parts(&backend);
        let mut processor =
            ParallelWorkProcessor::new(client, factory, sink, &BulkConfig::parallel());

        let mut workset = Workset::new();
        workset.push(Arc::new(StubWork::failing("head", "boom")));
        workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("a")));
        workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("b")));
        let (submitted, handles) = submit(workset);

        processor.process_batch(vec![submitted]).await;

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.outcome().await);
        }
        assert!(outcomes[0].is_failed());
        assert!(outcomes[1].is_skipped());
        assert!(outcomes[2].is_skipped());
        assert!(backend.bulk_calls().is_empty());
    }
}
