//! Actor lifecycle, per-actor call ordering, and kill semantics.

use skein_api::{Args, BackendKind};
use skein_e2e_tests::{test_runtime, ALL_BACKENDS};
use skein_types::{ActorStatus, ErrorKind};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counter_actor_serializes_interleaved_callers() {
    for backend in ALL_BACKENDS {
        let runtime = Arc::new(test_runtime(backend, 3, counter()).await);
        let actor = runtime
            .create_actor("counter", Args::new())
            .await
            .unwrap();

        // Five increments from two interleaved callers; every interleaving
        // must leave the counter at exactly 5.
        let a = {
            let runtime = Arc::clone(&runtime);
            let actor = actor;
            tokio::spawn(async move {
                let mut refs = Vec::new();
                for _ in 0..3 {
                    refs.push(runtime.call_actor(&actor, "increment", Args::new()).await.unwrap());
                }
                refs
            })
        };
        let b = {
            let runtime = Arc::clone(&runtime);
            let actor = actor;
            tokio::spawn(async move {
                let mut refs = Vec::new();
                for _ in 0..2 {
                    refs.push(runtime.call_actor(&actor, "increment", Args::new()).await.unwrap());
                }
                refs
            })
        };
        let (refs_a, refs_b) = (a.await.unwrap(), b.await.unwrap());
        for reference in refs_a.iter().chain(refs_b.iter()) {
            runtime.get::<i64>(reference, None).await.unwrap();
        }

        let value = runtime
            .call_actor(&actor, "value", Args::new())
            .await
            .unwrap();
        assert_eq!(
            runtime.get::<i64>(&value, None).await.unwrap(),
            5,
            "backend {:?}",
            backend
        );

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn actor_state_observes_prior_calls_in_submission_order() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;
        let actor = runtime
            .create_actor("counter", Args::new().value(&100i64).unwrap())
            .await
            .unwrap();

        let after_add = runtime
            .call_actor(&actor, "add", Args::new().value(&11i64).unwrap())
            .await
            .unwrap();
        let value = runtime
            .call_actor(&actor, "value", Args::new())
            .await
            .unwrap();

        // The second call must see the first call's effect.
        assert_eq!(runtime.get::<i64>(&after_add, None).await.unwrap(), 111);
        assert_eq!(runtime.get::<i64>(&value, None).await.unwrap(), 111);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cooperative_suspension_does_not_reorder_queued_calls() {
    // Async actor variant: a method that suspends mid-execution still
    // completes before the next queued call runs.
    for backend in [BackendKind::MessagePassing, BackendKind::Sequential] {
        let runtime = test_runtime(backend, 2, counter()).await;
        let actor = runtime
            .create_actor("counter", Args::new())
            .await
            .unwrap();

        let deferred = runtime
            .call_actor(&actor, "deferred_increment", Args::new())
            .await
            .unwrap();
        let value = runtime
            .call_actor(&actor, "value", Args::new())
            .await
            .unwrap();

        assert_eq!(runtime.get::<i64>(&deferred, None).await.unwrap(), 1);
        assert_eq!(
            runtime.get::<i64>(&value, None).await.unwrap(),
            1,
            "value call overtook the suspended increment on {:?}",
            backend
        );

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_method_call_does_not_kill_the_actor() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;
        let actor = runtime.create_actor("counter", Args::new()).await.unwrap();

        let failed = runtime.call_actor(&actor, "fail", Args::new()).await.unwrap();
        let err = runtime.get::<i64>(&failed, None).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(ErrorKind::TaskExecution));

        // The actor is still alive and consistent.
        let value = runtime
            .call_actor(&actor, "increment", Args::new())
            .await
            .unwrap();
        assert_eq!(runtime.get::<i64>(&value, None).await.unwrap(), 1);

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kill_fails_queued_and_future_calls() {
    for backend in ALL_BACKENDS {
        let runtime = test_runtime(backend, 2, counter()).await;
        let actor = runtime.create_actor("counter", Args::new()).await.unwrap();

        // Establish some state first.
        let warm = runtime
            .call_actor(&actor, "increment", Args::new())
            .await
            .unwrap();
        assert_eq!(runtime.get::<i64>(&warm, None).await.unwrap(), 1);

        runtime.kill(&actor).await.unwrap();
        // Give the kill a moment to reach the host.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.actor_status(&actor), Some(ActorStatus::Dead));

        let after = runtime
            .call_actor(&actor, "increment", Args::new())
            .await
            .unwrap();
        let err = runtime.get::<i64>(&after, None).await.unwrap_err();
        assert_eq!(
            err.failure_kind(),
            Some(ErrorKind::ActorDead),
            "backend {:?}",
            backend
        );

        runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn actors_spread_across_workers() {
    let runtime = test_runtime(BackendKind::MessagePassing, 3, counter()).await;

    // Placement is least-loaded with rank ties; three actors land on three
    // distinct workers.
    let mut homes = std::collections::HashSet::new();
    for _ in 0..3 {
        let actor = runtime.create_actor("counter", Args::new()).await.unwrap();
        homes.insert(actor.wire().home);
    }
    assert_eq!(homes.len(), 3);

    runtime.shutdown().await;
}
