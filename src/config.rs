//! Orchestration tuning configuration.
//!
//! Plain typed configuration with defaults for the serial and parallel
//! orchestrator families. Values are deliberately small structs so callers
//! can override individual knobs with struct-update syntax.

use serde::{Deserialize, Serialize};

/// Maximum number of works merged into one aggregate request.
pub const MAX_BULK_SIZE: usize = 250;

/// Minimum accumulator size for serial orchestrators. Serial producers often
/// submit several works per workset, so flushing singleton bulks would defeat
/// the purpose of bulking.
pub const SERIAL_MIN_BULK_SIZE: usize = 2;

/// Minimum accumulator size for parallel orchestrators. Parallel producers
/// generally submit single-work worksets, so the bulking decision always
/// lands when only one work is accumulated; any minimum above 1 would flush
/// every work individually and starve bulking entirely.
pub const PARALLEL_MIN_BULK_SIZE: usize = 1;

/// Batch bound for serial orchestrators: large enough to fill maximum-size
/// bulks most of the time, small enough to bound memory held by pending
/// worksets.
pub const SERIAL_MAX_WORKSETS_PER_BATCH: usize = 10 * MAX_BULK_SIZE;

/// Batch bound for parallel orchestrators. Higher than the serial bound:
/// the parallel family multiplexes many producers of single-work worksets
/// onto one shared consumer, so deeper batches are needed to reach bulk-size
/// efficiency.
pub const PARALLEL_MAX_WORKSETS_PER_BATCH: usize = 20 * MAX_BULK_SIZE;

/// Bulk accumulator bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Accumulators below this size at flush time execute their works
    /// individually instead of as an aggregate
    pub min_bulk_size: usize,

    /// Accumulators flush as soon as they reach this size
    pub max_bulk_size: usize,
}

impl BulkConfig {
    /// Bounds for serial orchestrators.
    pub fn serial() -> Self {
        Self {
            min_bulk_size: SERIAL_MIN_BULK_SIZE,
            max_bulk_size: MAX_BULK_SIZE,
        }
    }

    /// Bounds for the parallel family.
    pub fn parallel() -> Self {
        Self {
            min_bulk_size: PARALLEL_MIN_BULK_SIZE,
            max_bulk_size: MAX_BULK_SIZE,
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self::serial()
    }
}

/// Configuration of one batching orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum worksets drained into one batch per consumer cycle
    pub max_worksets_per_batch: usize,

    /// Submission queue capacity; `submit` awaits free capacity when
    /// producers outpace the consumer
    pub queue_capacity: usize,

    /// Bulk accumulator bounds for this orchestrator's batches
    pub bulk: BulkConfig,
}

impl OrchestratorConfig {
    /// Configuration for a dedicated serial orchestrator.
    pub fn serial() -> Self {
        Self {
            max_worksets_per_batch: SERIAL_MAX_WORKSETS_PER_BATCH,
            queue_capacity: 10_000,
            bulk: BulkConfig::serial(),
        }
    }

    /// Configuration for the shared root parallel orchestrator.
    pub fn parallel() -> Self {
        Self {
            max_worksets_per_batch: PARALLEL_MAX_WORKSETS_PER_BATCH,
            queue_capacity: 10_000,
            bulk: BulkConfig::parallel(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::serial()
    }
}
