//! # Work Bulker
//!
//! Greedy accumulation of contiguous bulk-eligible works into aggregate
//! requests.
//!
//! A bulk-eligible work extends the currently open accumulator; a
//! non-eligible work, a full accumulator (`max_bulk_size`), or the end of the
//! batch flushes it. A flush registers one aggregate execution plus one
//! result extraction per member, unless the accumulator holds fewer than
//! `min_bulk_size` works, in which case the bulk overhead is not worth it and
//! each member is registered as an individual execution instead.
//!
//! This is the throughput lever of the whole engine: a larger `max_bulk_size`
//! cuts request counts, while `min_bulk_size` trades latency against
//! overhead on sparse submission patterns.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::backend::AggregateFactory;
use crate::config::BulkConfig;
use crate::orchestration::sequence::{WorkSequenceBuilder, WorksetTag};
use crate::work::{BulkableWork, SubmittedBulkable};

struct PendingItem {
    workset: WorksetTag,
    work: SubmittedBulkable,
}

/// Accumulates contiguous bulk-eligible works and registers them on the
/// sequence builder, merged or individually.
pub(crate) struct WorkBulker {
    factory: Arc<dyn AggregateFactory>,
    min_bulk_size: usize,
    max_bulk_size: usize,
    items: Vec<PendingItem>,
}

impl WorkBulker {
    pub(crate) fn new(factory: Arc<dyn AggregateFactory>, config: &BulkConfig) -> Self {
        Self {
            factory,
            min_bulk_size: config.min_bulk_size.max(1),
            max_bulk_size: config.max_bulk_size.max(1),
            items: Vec::new(),
        }
    }

    /// Extend the open accumulator with one bulk-eligible work. Flushes
    /// immediately when the accumulator reaches `max_bulk_size`.
    pub(crate) fn add(
        &mut self,
        sequence: &mut WorkSequenceBuilder,
        workset: WorksetTag,
        work: SubmittedBulkable,
    ) {
        self.items.push(PendingItem { workset, work });
        trace!(accumulated = self.items.len(), "bulk accumulator extended");
        if self.items.len() >= self.max_bulk_size {
            self.flush(sequence);
        }
    }

    /// Flush the open accumulator into the sequence. Called when a
    /// non-eligible work interrupts the run and at batch end.
    pub(crate) fn flush(&mut self, sequence: &mut WorkSequenceBuilder) {
        if self.items.is_empty() {
            return;
        }
        let items = std::mem::take(&mut self.items);

        if items.len() < self.min_bulk_size {
            debug!(
                works = items.len(),
                min_bulk_size = self.min_bulk_size,
                "accumulator under minimum bulk size; executing works individually"
            );
            for PendingItem { workset, work } in items {
                sequence.add_non_bulk_execution(workset, work.into_single());
            }
            return;
        }

        // The aggregate is gated on the chain state of the workset the
        // accumulator opened in; membership order is submission order.
        let opened_in = items[0].workset;
        let works: Vec<Arc<dyn BulkableWork>> = items
            .iter()
            .map(|item| Arc::clone(&item.work.work))
            .collect();

        let (request_tx, request_rx) = oneshot::channel();
        let bulk = sequence.add_bulk_execution(opened_in, request_rx);
        let mut extraction = sequence.add_bulk_result_extraction(bulk);
        for (position, PendingItem { workset, work }) in items.into_iter().enumerate() {
            extraction.add(workset, work, position);
        }

        debug!(works = works.len(), "registered aggregate request");
        let _ = request_tx.send(self.factory.build(&works));
    }
}
