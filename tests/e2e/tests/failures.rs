//! Failure propagation: task faults, dependency fail-fast, worker loss,
//! and reference-count driven release.

use skein_api::{Args, BackendKind, Error};
use skein_e2e_tests::{test_runtime, ALL_BACKENDS};
use skein_types::{ActorStatus, ErrorKind, ProcessId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_fault_is_inert_until_observed() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;

        let failed = runtime.submit("explode", Args::new()).await.unwrap();
        // Other work proceeds untouched by the stored failure.
        let ok = runtime
            .submit("square", Args::new().value(&6i64).unwrap())
            .await
            .unwrap();
        assert_eq!(runtime.get::<i64>(&ok, None).await.unwrap(), 36);

        let err = runtime.get::<i64>(&failed, None).await.unwrap_err();
        match err {
            Error::Failed(object) => {
                assert_eq!(object.kind, ErrorKind::TaskExecution);
                assert!(object.message.contains("explode"));
            }
            other => panic!("expected captured failure, got {other:?}"),
        }

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependent_task_fails_without_executing() {
    for backend in ALL_BACKENDS {
        let executions = counter();
        let runtime = test_runtime(backend, 2, Arc::clone(&executions)).await;

        let failed = runtime.submit("explode", Args::new()).await.unwrap();
        let dependent = runtime
            .submit("counted_echo", Args::new().reference(&failed))
            .await
            .unwrap();

        let err = runtime.get::<i64>(&dependent, None).await.unwrap_err();
        assert_eq!(
            err.failure_kind(),
            Some(ErrorKind::Dependency),
            "backend {:?}",
            backend
        );
        assert_eq!(
            executions.load(Ordering::SeqCst),
            0,
            "dependent task must never execute on {:?}",
            backend
        );

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependency_failure_cascades_through_chains() {
    for backend in ALL_BACKENDS {
        let executions = counter();
        let runtime = test_runtime(backend, 2, Arc::clone(&executions)).await;

        let root = runtime.submit("explode", Args::new()).await.unwrap();
        let mid = runtime
            .submit("counted_echo", Args::new().reference(&root))
            .await
            .unwrap();
        let leaf = runtime
            .submit("counted_echo", Args::new().reference(&mid))
            .await
            .unwrap();

        let err = runtime.get::<i64>(&leaf, None).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::Dependency));
        assert_eq!(executions.load(Ordering::SeqCst), 0);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_worker_fails_its_task_and_actors() {
    let runtime = test_runtime(BackendKind::MessagePassing, 1, counter()).await;
    let backend = runtime.message_passing().expect("message-passing backend").clone();

    // Single worker: the actor and the slow task are both on rank 1.
    let actor = runtime.create_actor("counter", Args::new()).await.unwrap();
    let warm = runtime
        .call_actor(&actor, "increment", Args::new())
        .await
        .unwrap();
    assert_eq!(runtime.get::<i64>(&warm, None).await.unwrap(), 1);

    let in_flight = runtime
        .submit("slow_echo", Args::new().value(&1i64).unwrap())
        .await
        .unwrap();
    backend.kill_worker(ProcessId(1));

    let err = runtime
        .get::<i64>(&in_flight, Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), Some(ErrorKind::WorkerLost));

    // The actor homed there is dead; new calls fail with ActorDead.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let call = runtime
        .call_actor(&actor, "increment", Args::new())
        .await
        .unwrap();
    let err = runtime.get::<i64>(&call, None).await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(ErrorKind::ActorDead));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_worker_fails_pending_fetches() {
    let runtime = test_runtime(BackendKind::MessagePassing, 2, counter()).await;
    let backend = runtime.message_passing().unwrap().clone();

    let produced = runtime
        .submit("square", Args::new().value(&4i64).unwrap())
        .await
        .unwrap();
    // Ensure the value is sealed on its worker but never fetched.
    let (ready, _) = runtime
        .wait(
            std::slice::from_ref(&produced),
            1,
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);

    let owner = backend
        .controller()
        .object_state(produced.id())
        .expect("object is tracked")
        .owner;
    assert!(!owner.is_controller());
    backend.kill_worker(owner);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = runtime
        .get::<i64>(&produced, Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), Some(ErrorKind::WorkerLost));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn releasing_last_reference_frees_the_store_entry() {
    let runtime = test_runtime(BackendKind::MessagePassing, 1, counter()).await;
    let backend = runtime.message_passing().unwrap().clone();
    let store = Arc::clone(backend.controller().store());

    let before = store.stats().owned_entries;
    let reference = runtime.put(&vec![7u8; 4096]).unwrap();
    assert_eq!(store.stats().owned_entries, before + 1);

    let clone = reference.clone();
    drop(reference);
    // A surviving clone holds the same count unit; nothing freed yet.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.stats().owned_entries, before + 1);

    drop(clone);
    let mut freed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if store.stats().owned_entries == before {
            freed = true;
            break;
        }
    }
    assert!(freed, "store entry must be freed after the last release");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serialization_mismatch_fails_the_task_not_the_process() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;

        // "square" expects an 8-byte i64; hand it a 1-byte bool payload.
        let bad = runtime
            .submit("square", Args::new().value(&true).unwrap())
            .await
            .unwrap();
        let err = runtime.get::<i64>(&bad, None).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::Serialization));

        // The runtime keeps working.
        let ok = runtime
            .submit("square", Args::new().value(&3i64).unwrap())
            .await
            .unwrap();
        assert_eq!(runtime.get::<i64>(&ok, None).await.unwrap(), 9);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_actor_reported_after_worker_loss() {
    let runtime = test_runtime(BackendKind::MessagePassing, 2, counter()).await;
    let backend = runtime.message_passing().unwrap().clone();

    let actor = runtime.create_actor("counter", Args::new()).await.unwrap();
    let home = actor.wire().home;
    assert_eq!(runtime.actor_status(&actor), Some(ActorStatus::Alive));

    backend.kill_worker(home);
    let mut dead = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if runtime.actor_status(&actor) == Some(ActorStatus::Dead) {
            dead = true;
            break;
        }
    }
    assert!(dead, "actor must transition to dead with its worker");

    runtime.shutdown().await;
}
