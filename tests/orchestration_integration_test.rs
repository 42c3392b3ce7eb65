//! End-to-end tests of the orchestration engine through its public surface:
//! provider, orchestrators, worksets, and outcome handles, against the
//! recording stub backend.

use std::sync::Arc;

use searchwork_core::backend::{BackendClient, BulkRequestFactory, LoggingFailureSink};
use searchwork_core::orchestration::OrchestratorProvider;
use searchwork_core::test_support::{RecordingBackend, StubBulkableWork, StubWork};
use searchwork_core::work::{WorkError, WorkOutcome, Workset};

fn provider(backend: &Arc<RecordingBackend>) -> OrchestratorProvider {
    OrchestratorProvider::new(
        "backend-root",
        Arc::clone(backend) as Arc<dyn BackendClient>,
        Arc::new(BulkRequestFactory),
        Arc::new(LoggingFailureSink),
    )
}

#[tokio::test]
async fn parallel_workset_bulks_in_submission_order_with_one_refresh() {
    // Three bulk-eligible works in one workset: exactly one aggregate
    // request carrying them in submitted order, one refresh call, three
    // successes.
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    provider.start().unwrap();
    let orchestrator = provider.create_parallel_orchestrator("index-books");

    let mut workset = Workset::new();
    workset.push_bulkable(Arc::new(
        StubBulkableWork::succeeding("index-doc1").writing_to("books"),
    ));
    workset.push_bulkable(Arc::new(
        StubBulkableWork::succeeding("index-doc2").writing_to("books"),
    ));
    workset.push_bulkable(Arc::new(
        StubBulkableWork::succeeding("delete-doc3").writing_to("books"),
    ));

    let handles = orchestrator.submit(workset).await.unwrap();
    for handle in handles {
        assert!(handle.outcome().await.is_success());
    }

    assert_eq!(
        backend.bulk_calls(),
        vec![vec![
            "index-doc1".to_string(),
            "index-doc2".to_string(),
            "delete-doc3".to_string()
        ]]
    );
    assert_eq!(backend.refresh_calls(), vec![vec!["books".to_string()]]);

    provider.pre_stop().await.unwrap();
    provider.stop();
}

#[tokio::test]
async fn serial_bulk_failure_fails_both_works_instead_of_skipping() {
    // An aggregate that fails at the backend marks every merged work Failed
    // (bulk-caused), never Skipped, since the callers did nothing wrong.
    let backend = Arc::new(RecordingBackend::new());
    backend.fail_next_bulk("bulk endpoint unavailable");
    let provider = provider(&backend);
    let serial = provider.create_serial_orchestrator("index-books-serial");
    serial.start().unwrap();

    let mut workset = Workset::new();
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("index-doc1")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("index-doc2")));

    let handles = serial.submit(workset).await.unwrap();
    for handle in handles {
        match handle.outcome().await {
            WorkOutcome::Failed { cause } => {
                assert!(matches!(*cause, WorkError::BulkFailed { .. }));
            }
            other => panic!("expected bulk-caused failure, got {other:?}"),
        }
    }
    serial.stop();
}

#[tokio::test]
async fn bulk_eligible_works_skip_when_an_earlier_work_already_failed() {
    // A failing non-bulk work ahead of two bulk-eligible works skips both:
    // no accumulator ever executes past a failure ahead of it.
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    provider.start().unwrap();
    let orchestrator = provider.create_parallel_orchestrator("index-books");

    let mut workset = Workset::new();
    workset.push(Arc::new(StubWork::failing("schema-change", "mapping conflict")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("index-doc1")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("index-doc2")));

    let handles = orchestrator.submit(workset).await.unwrap();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.outcome().await);
    }

    assert!(outcomes[0].is_failed());
    for outcome in &outcomes[1..] {
        match outcome {
            WorkOutcome::Skipped { cause } => {
                assert!(cause.to_string().contains("mapping conflict"));
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }
    assert!(backend.bulk_calls().is_empty());
    provider.stop();
}

#[tokio::test]
async fn failure_skips_only_the_rest_of_its_own_workset() {
    // u1, u2 succeed; u3 fails; u4, u5 skip with u3's cause. A sibling
    // workset is untouched.
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    let serial = provider.create_serial_orchestrator("index-books-serial");
    serial.start().unwrap();

    let mut workset = Workset::new();
    for label in ["u1", "u2"] {
        workset.push(Arc::new(StubWork::succeeding(label)));
    }
    workset.push(Arc::new(StubWork::failing("u3", "version conflict")));
    for label in ["u4", "u5"] {
        workset.push(Arc::new(StubWork::succeeding(label)));
    }
    let first_handles = serial.submit(workset).await.unwrap();
    let sibling_handles = serial
        .submit(Workset::single(Arc::new(StubWork::succeeding("sibling"))))
        .await
        .unwrap();

    let mut outcomes = Vec::new();
    for handle in first_handles {
        outcomes.push(handle.outcome().await);
    }
    assert!(outcomes[0].is_success());
    assert!(outcomes[1].is_success());
    assert!(outcomes[2].is_failed());
    for outcome in &outcomes[3..] {
        match outcome {
            WorkOutcome::Skipped { cause } => {
                assert!(cause.to_string().contains("version conflict"));
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }
    for handle in sibling_handles {
        assert!(handle.outcome().await.is_success());
    }
    // u4 and u5 never reached the backend.
    assert_eq!(backend.single_calls(), vec!["u1", "u2", "u3", "sibling"]);
    serial.stop();
}

#[tokio::test]
async fn per_item_rejection_fails_only_that_position() {
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    provider.start().unwrap();
    let orchestrator = provider.create_parallel_orchestrator("index-books");

    let mut workset = Workset::new();
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("ok-0")));
    workset.push_bulkable(Arc::new(StubBulkableWork::rejected_in_bulk("bad-1")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("ok-2")));

    let handles = orchestrator.submit(workset).await.unwrap();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.outcome().await);
    }

    assert!(outcomes[0].is_success());
    match &outcomes[1] {
        WorkOutcome::Failed { cause } => {
            assert!(matches!(**cause, WorkError::ItemRejected { position: 1, .. }));
        }
        other => panic!("expected per-item failure, got {other:?}"),
    }
    assert!(outcomes[2].is_success());
    provider.stop();
}

#[tokio::test]
async fn bulking_never_reorders_submitted_works() {
    // Mixed eligible and non-eligible works: replaying the backend call log
    // in aggregate-expanded order reconstructs submission order exactly.
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    provider.start().unwrap();
    let orchestrator = provider.create_parallel_orchestrator("index-books");

    let mut workset = Workset::new();
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("w0")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("w1")));
    workset.push(Arc::new(StubWork::succeeding("w2")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("w3")));
    workset.push(Arc::new(StubWork::succeeding("w4")));

    let handles = orchestrator.submit(workset).await.unwrap();
    for handle in handles {
        assert!(handle.outcome().await.is_success());
    }

    let mut replayed = Vec::new();
    for call in backend.call_order() {
        if let Some(labels) = call.strip_prefix("bulk:") {
            replayed.extend(labels.split(',').map(str::to_string));
        } else if let Some(label) = call.strip_prefix("single:") {
            replayed.push(label.to_string());
        }
    }
    assert_eq!(replayed, vec!["w0", "w1", "w2", "w3", "w4"]);
    provider.stop();
}

#[tokio::test]
async fn serial_undersized_remainder_executes_individually() {
    // With the serial minimum of 2, a lone trailing bulk-eligible work is
    // never flushed as a one-item aggregate.
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    let serial = provider.create_serial_orchestrator("index-books-serial");
    serial.start().unwrap();

    let mut workset = Workset::new();
    workset.push(Arc::new(StubWork::succeeding("head")));
    workset.push_bulkable(Arc::new(StubBulkableWork::succeeding("tail")));

    let handles = serial.submit(workset).await.unwrap();
    for handle in handles {
        assert!(handle.outcome().await.is_success());
    }

    assert!(backend.bulk_calls().is_empty());
    assert_eq!(backend.single_calls(), vec!["head", "tail"]);
    serial.stop();
}

#[tokio::test]
async fn serial_worksets_complete_in_order_including_refresh() {
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    let serial = provider.create_serial_orchestrator("index-books-serial");
    serial.start().unwrap();

    let first = serial
        .submit(Workset::single(Arc::new(
            StubWork::succeeding("a").writing_to("books"),
        )))
        .await
        .unwrap();
    for handle in first {
        assert!(handle.outcome().await.is_success());
    }
    let second = serial
        .submit(Workset::single(Arc::new(
            StubWork::succeeding("b").writing_to("books"),
        )))
        .await
        .unwrap();
    for handle in second {
        assert!(handle.outcome().await.is_success());
    }

    // The first workset's refresh flushed before the second workset ran.
    assert_eq!(
        backend.call_order(),
        vec![
            "single:a".to_string(),
            "refresh:books".to_string(),
            "single:b".to_string(),
            "refresh:books".to_string()
        ]
    );
    serial.stop();
}

#[tokio::test]
async fn parallel_preserves_order_within_a_workset() {
    // Cross-workset order is explicitly undefined for the parallel family,
    // but within one workset submission order always holds.
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    provider.start().unwrap();
    let orchestrator = provider.create_parallel_orchestrator("index-books");

    let mut workset = Workset::new();
    for label in ["first", "second", "third"] {
        workset.push(Arc::new(StubWork::succeeding(label)));
    }
    let handles = orchestrator.submit(workset).await.unwrap();
    for handle in handles {
        assert!(handle.outcome().await.is_success());
    }

    assert_eq!(backend.single_calls(), vec!["first", "second", "third"]);
    provider.stop();
}

#[tokio::test]
async fn children_interleave_through_the_shared_root_queue() {
    let backend = Arc::new(RecordingBackend::new());
    let provider = provider(&backend);
    provider.start().unwrap();

    let books = provider.create_parallel_orchestrator("index-books");
    let authors = provider.create_parallel_orchestrator("index-authors");

    let mut handles = Vec::new();
    handles.extend(
        books
            .submit(Workset::single_bulkable(Arc::new(
                StubBulkableWork::succeeding("book-1"),
            )))
            .await
            .unwrap(),
    );
    handles.extend(
        authors
            .submit(Workset::single_bulkable(Arc::new(
                StubBulkableWork::succeeding("author-1"),
            )))
            .await
            .unwrap(),
    );
    for handle in handles {
        assert!(handle.outcome().await.is_success());
    }

    // Both children fed the same consumer; their single-work worksets may
    // even share one aggregate when drained into the same batch.
    let bulked: usize = backend.bulk_calls().iter().map(|bulk| bulk.len()).sum();
    let singles = backend.single_calls().len();
    assert_eq!(bulked + singles, 2);

    provider.pre_stop().await.unwrap();
    provider.stop();
}
