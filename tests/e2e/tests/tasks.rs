//! Task submission, dependency resolution and wait semantics.

use skein_api::{Args, BackendKind};
use skein_e2e_tests::{test_runtime, ALL_BACKENDS};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn put_get_round_trip_on_every_backend() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;

        let value = vec![1u64, 2, 3, 5, 8, 13];
        let reference = runtime.put(&value).unwrap();
        let back: Vec<u64> = runtime.get(&reference, None).await.unwrap();
        assert_eq!(back, value, "backend {:?}", backend);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_independent_squares_return_in_submission_order() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 4, counter()).await;

        let mut refs = Vec::new();
        for i in 0..10i64 {
            refs.push(
                runtime
                    .submit("square", Args::new().value(&i).unwrap())
                    .await
                    .unwrap(),
            );
        }
        let values: Vec<i64> = runtime.get_many(&refs, None).await.unwrap();
        assert_eq!(
            values,
            vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81],
            "backend {:?}",
            backend
        );

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reference_arguments_chain_across_tasks() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;

        let x = runtime.put(&5i64).unwrap();
        let squared = runtime
            .submit("square", Args::new().reference(&x))
            .await
            .unwrap();
        let doubled = runtime
            .submit("double", Args::new().reference(&squared))
            .await
            .unwrap();
        assert_eq!(runtime.get::<i64>(&doubled, None).await.unwrap(), 50);

        // Mixed inline and reference arguments.
        let sum = runtime
            .submit(
                "add",
                Args::new().reference(&squared).value(&17i64).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(runtime.get::<i64>(&sum, None).await.unwrap(), 42);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiple_returns_split_into_separate_refs() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;

        let refs = runtime
            .submit_n(
                "divmod",
                Args::new().value(&17i64).unwrap().value(&5i64).unwrap(),
                2,
            )
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(runtime.get::<i64>(&refs[0], None).await.unwrap(), 3);
        assert_eq!(runtime.get::<i64>(&refs[1], None).await.unwrap(), 2);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_returns_ready_subset_without_blocking_past_timeout() {
    let runtime = test_runtime(BackendKind::MessagePassing, 3, counter()).await;

    let slow = runtime
        .submit("slow_echo", Args::new().value(&1i64).unwrap())
        .await
        .unwrap();
    let fast_a = runtime
        .submit("square", Args::new().value(&2i64).unwrap())
        .await
        .unwrap();
    let fast_b = runtime
        .submit("square", Args::new().value(&3i64).unwrap())
        .await
        .unwrap();

    // Let the fast tasks land first.
    let all = [slow.clone(), fast_a.clone(), fast_b.clone()];
    let (ready, _) = runtime
        .wait(&all, 2, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(ready.len() >= 2);

    // With everything already resolved, wait must return immediately.
    let done = runtime.get::<i64>(&slow, None).await.unwrap();
    assert_eq!(done, 1);
    let start = Instant::now();
    let (ready, not_ready) = runtime
        .wait(&all, 3, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(ready.len(), 3);
    assert!(not_ready.is_empty());
    assert!(start.elapsed() < Duration::from_millis(100));

    // A timeout shorter than the task bounds the wait, not the task.
    let slow2 = runtime
        .submit("slow_echo", Args::new().value(&9i64).unwrap())
        .await
        .unwrap();
    let start = Instant::now();
    let (_, not_ready) = runtime
        .wait(
            std::slice::from_ref(&slow2),
            1,
            Some(Duration::from_millis(30)),
        )
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(120));
    assert_eq!(not_ready.len(), 1);
    // The task still completes afterwards.
    assert_eq!(runtime.get::<i64>(&slow2, None).await.unwrap(), 9);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn get_timeout_bounds_the_wait_only() {
    let runtime = test_runtime(BackendKind::MessagePassing, 2, counter()).await;

    let slow = runtime
        .submit("slow_echo", Args::new().value(&7i64).unwrap())
        .await
        .unwrap();
    let err = runtime
        .get::<i64>(&slow, Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, skein_api::Error::Timeout { .. }));

    // Not cancelled: a later get sees the value.
    assert_eq!(runtime.get::<i64>(&slow, None).await.unwrap(), 7);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_payloads_chunk_transparently() {
    let runtime = test_runtime(BackendKind::MessagePassing, 2, counter()).await;

    // Several frame budgets worth of data.
    let big = vec![0xa5u8; 1_500_000];
    let reference = runtime.put(&big).unwrap();

    let length = runtime
        .submit("len", Args::new().reference(&reference))
        .await
        .unwrap();
    assert_eq!(
        runtime.get::<u64>(&length, None).await.unwrap(),
        1_500_000u64
    );

    let back: Vec<u8> = runtime.get(&reference, None).await.unwrap();
    assert_eq!(back, big);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_resources_reports_every_worker() {
    let runtime = test_runtime(BackendKind::MessagePassing, 3, counter()).await;
    let workers = runtime.cluster_resources();
    assert_eq!(workers.len(), 3);
    runtime.shutdown().await;
}
