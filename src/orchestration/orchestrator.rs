//! # Batching Orchestrator
//!
//! Long-lived dispatcher owning the submission queue and the background
//! consumer that drains it into bounded batches.
//!
//! ## Architecture
//!
//! ```text
//! callers ──▶ submit(workset) ──▶ bounded queue ──▶ consumer task
//!                 │                                     │ drains ≤ N worksets
//!                 ▼                                     ▼
//!          Vec<WorkHandle>                        WorkProcessor
//!          (resolved later)                 (bulker + sequence builder)
//! ```
//!
//! One consumer task per resource group: a serial orchestrator owns its queue
//! and consumer exclusively; the parallel family (root plus children created
//! with [`BatchingOrchestrator::create_child`]) shares one queue and one
//! consumer. The consumer awaits each batch's completion (including its
//! refresh flush) before draining the next, which bounds in-flight work to
//! one batch per resource group.
//!
//! ## Lifecycle
//!
//! CREATED → STARTED → DRAINING → STOPPED, with guarded transitions.
//! `submit` only succeeds while STARTED. [`BatchingOrchestrator::pre_stop`]
//! drains everything queued before the call; [`BatchingOrchestrator::stop`]
//! halts the consumer, forcibly when called without draining first, in which
//! case still-queued works resolve with a shutdown failure rather than
//! hanging their callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::orchestration::processor::WorkProcessor;
use crate::work::{SubmittedWorkset, WorkHandle, Workset};

/// Lifecycle states of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Created,
    Started,
    Draining,
    Stopped,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestratorState::Created => "created",
            OrchestratorState::Started => "started",
            OrchestratorState::Draining => "draining",
            OrchestratorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Orchestrator lifecycle and submission errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator '{name}' is {state} and not accepting submissions")]
    NotAccepting {
        name: String,
        state: OrchestratorState,
    },

    #[error("orchestrator '{name}': invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: OrchestratorState,
        to: OrchestratorState,
    },

    #[error("orchestrator '{name}' submission queue is closed")]
    QueueClosed { name: String },
}

/// Point-in-time orchestrator statistics.
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub name: String,
    pub state: OrchestratorState,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_worksets: u64,
    pub submitted_works: u64,
    pub processed_batches: u64,
}

enum QueueItem {
    Workset(SubmittedWorkset),
    /// Fires once every workset queued before it has fully processed.
    Drain(oneshot::Sender<()>),
}

struct StatsCells {
    started_at: Mutex<Option<DateTime<Utc>>>,
    submitted_worksets: AtomicU64,
    submitted_works: AtomicU64,
    processed_batches: AtomicU64,
}

impl StatsCells {
    fn new() -> Self {
        Self {
            started_at: Mutex::new(None),
            submitted_worksets: AtomicU64::new(0),
            submitted_works: AtomicU64::new(0),
            processed_batches: AtomicU64::new(0),
        }
    }
}

/// State shared between an orchestrator and its children: lifecycle cell,
/// submission queue sender, and counters.
struct OrchestratorShared {
    name: String,
    state: Mutex<OrchestratorState>,
    sender: mpsc::Sender<QueueItem>,
    stats: StatsCells,
}

impl OrchestratorShared {
    async fn submit(
        &self,
        origin: &str,
        workset: Workset,
    ) -> Result<Vec<WorkHandle>, OrchestratorError> {
        {
            let state = *self.state.lock();
            if state != OrchestratorState::Started {
                return Err(OrchestratorError::NotAccepting {
                    name: origin.to_string(),
                    state,
                });
            }
        }

        let works = workset.len() as u64;
        let (submitted, handles) = SubmittedWorkset::from_workset(workset);
        self.sender
            .send(QueueItem::Workset(submitted))
            .await
            .map_err(|_| OrchestratorError::QueueClosed {
                name: origin.to_string(),
            })?;

        self.stats.submitted_worksets.fetch_add(1, Ordering::Relaxed);
        self.stats.submitted_works.fetch_add(works, Ordering::Relaxed);
        Ok(handles)
    }
}

/// Long-lived dispatcher: owns the submission queue and background consumer
/// for one resource group.
pub struct BatchingOrchestrator {
    shared: Arc<OrchestratorShared>,
    config: OrchestratorConfig,
    receiver: Mutex<Option<mpsc::Receiver<QueueItem>>>,
    processor: Mutex<Option<Box<dyn WorkProcessor>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl BatchingOrchestrator {
    pub(crate) fn new(
        name: String,
        config: OrchestratorConfig,
        processor: Box<dyn WorkProcessor>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        Self {
            shared: Arc::new(OrchestratorShared {
                name,
                state: Mutex::new(OrchestratorState::Created),
                sender,
                stats: StatsCells::new(),
            }),
            config,
            receiver: Mutex::new(Some(receiver)),
            processor: Mutex::new(Some(processor)),
            consumer: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> OrchestratorState {
        *self.shared.state.lock()
    }

    /// Launch the background consumer and begin accepting submissions.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = self.shared.state.lock();
            if *state != OrchestratorState::Created {
                return Err(OrchestratorError::InvalidTransition {
                    name: self.shared.name.clone(),
                    from: *state,
                    to: OrchestratorState::Started,
                });
            }
            *state = OrchestratorState::Started;
        }

        let receiver = self.receiver.lock().take();
        let processor = self.processor.lock().take();
        let (Some(receiver), Some(processor)) = (receiver, processor) else {
            // Only reachable if a previous start was interrupted mid-way.
            return Err(OrchestratorError::InvalidTransition {
                name: self.shared.name.clone(),
                from: OrchestratorState::Started,
                to: OrchestratorState::Started,
            });
        };

        *self.shared.stats.started_at.lock() = Some(Utc::now());
        let shared = Arc::clone(&self.shared);
        let max_worksets_per_batch = self.config.max_worksets_per_batch;
        let handle = tokio::spawn(consume_loop(
            shared,
            receiver,
            processor,
            max_worksets_per_batch,
        ));
        *self.consumer.lock() = Some(handle);

        info!(orchestrator = %self.shared.name, "orchestrator started");
        Ok(())
    }

    /// Submit one ordered workset. Returns one outcome handle per work,
    /// resolved later. Fails fast unless the orchestrator is STARTED; awaits
    /// queue capacity when producers outpace the consumer.
    pub async fn submit(&self, workset: Workset) -> Result<Vec<WorkHandle>, OrchestratorError> {
        let name = self.shared.name.clone();
        self.shared.submit(&name, workset).await
    }

    /// Stop accepting new submissions and wait until every workset queued
    /// before this call has fully processed, including its refresh flush.
    pub async fn pre_stop(&self) -> Result<(), OrchestratorError> {
        let consumer_running = {
            let mut state = self.shared.state.lock();
            match *state {
                OrchestratorState::Started | OrchestratorState::Draining => {
                    *state = OrchestratorState::Draining;
                    true
                }
                OrchestratorState::Created => {
                    // Never started: nothing can be queued.
                    *state = OrchestratorState::Draining;
                    false
                }
                OrchestratorState::Stopped => false,
            }
        };
        if !consumer_running {
            return Ok(());
        }

        info!(orchestrator = %self.shared.name, "draining submission queue");
        let (done_tx, done_rx) = oneshot::channel();
        self.shared
            .sender
            .send(QueueItem::Drain(done_tx))
            .await
            .map_err(|_| OrchestratorError::QueueClosed {
                name: self.shared.name.clone(),
            })?;
        done_rx.await.map_err(|_| OrchestratorError::QueueClosed {
            name: self.shared.name.clone(),
        })?;
        info!(orchestrator = %self.shared.name, "submission queue drained");
        Ok(())
    }

    /// Halt the consumer. Graceful when called after [`Self::pre_stop`] has
    /// completed; otherwise forcible, and still-queued works resolve with a
    /// shutdown failure on their handles.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == OrchestratorState::Stopped {
                return;
            }
            if *state == OrchestratorState::Started {
                warn!(
                    orchestrator = %self.shared.name,
                    "stopping without draining; queued works will resolve as shutdown failures"
                );
            }
            *state = OrchestratorState::Stopped;
        }
        if let Some(handle) = self.consumer.lock().take() {
            handle.abort();
        }
        info!(orchestrator = %self.shared.name, "orchestrator stopped");
    }

    /// Create a logical orchestrator sharing this orchestrator's queue and
    /// consumer, independently named for diagnostics. Intended for the
    /// parallel family: submissions from different children interleave with
    /// no ordering guarantee between them.
    pub fn create_child<N: Into<String>>(&self, name: N) -> ChildOrchestrator {
        let name = name.into();
        debug!(orchestrator = %self.shared.name, child = %name, "created child orchestrator");
        ChildOrchestrator {
            name,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            name: self.shared.name.clone(),
            state: self.state(),
            started_at: *self.shared.stats.started_at.lock(),
            submitted_worksets: self.shared.stats.submitted_worksets.load(Ordering::Relaxed),
            submitted_works: self.shared.stats.submitted_works.load(Ordering::Relaxed),
            processed_batches: self.shared.stats.processed_batches.load(Ordering::Relaxed),
        }
    }
}

/// Logical orchestrator forwarding submissions to its root's shared queue.
///
/// Children carry their own name for diagnostics but share the root's
/// lifecycle: submissions succeed only while the root is STARTED.
pub struct ChildOrchestrator {
    name: String,
    shared: Arc<OrchestratorShared>,
}

impl ChildOrchestrator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OrchestratorState {
        *self.shared.state.lock()
    }

    /// Submit one ordered workset through the shared root queue.
    pub async fn submit(&self, workset: Workset) -> Result<Vec<WorkHandle>, OrchestratorError> {
        self.shared.submit(&self.name, workset).await
    }
}

async fn consume_loop(
    shared: Arc<OrchestratorShared>,
    mut receiver: mpsc::Receiver<QueueItem>,
    mut processor: Box<dyn WorkProcessor>,
    max_worksets_per_batch: usize,
) {
    debug!(orchestrator = %shared.name, "consumer running");
    while let Some(first) = receiver.recv().await {
        let mut batch: Vec<SubmittedWorkset> = Vec::new();
        let mut drains: Vec<oneshot::Sender<()>> = Vec::new();
        match first {
            QueueItem::Workset(workset) => batch.push(workset),
            QueueItem::Drain(done) => drains.push(done),
        }
        while batch.len() < max_worksets_per_batch {
            match receiver.try_recv() {
                Ok(QueueItem::Workset(workset)) => batch.push(workset),
                Ok(QueueItem::Drain(done)) => drains.push(done),
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            let batch_id = Uuid::new_v4();
            debug!(
                orchestrator = %shared.name,
                %batch_id,
                worksets = batch.len(),
                "processing batch"
            );
            // Await completion before draining further: at most one batch in
            // flight per resource group.
            processor.process_batch(batch).await;
            shared.stats.processed_batches.fetch_add(1, Ordering::Relaxed);
            debug!(orchestrator = %shared.name, %batch_id, "batch complete");
        }

        // Everything queued before these markers has now fully processed.
        for done in drains {
            let _ = done.send(());
        }
    }
    debug!(orchestrator = %shared.name, "consumer finished");
}
