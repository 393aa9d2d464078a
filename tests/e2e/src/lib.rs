//! Shared fixtures for the Skein end-to-end scenarios: a runtime factory
//! with a standard set of registered functions and actor types, so every
//! test exercises the same surface across backends.

use async_trait::async_trait;
use bytes::Bytes;
use skein_api::{BackendKind, Runtime, RuntimeConfig};
use skein_engine::registry::encode_return;
use skein_engine::{EngineConfig, Invocation, RemoteActor};
use skein_types::{ErrorKind, ErrorObject};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Heartbeats fast enough that worker-loss tests resolve in well under a
/// second.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        heartbeat_interval: Duration::from_millis(25),
        heartbeat_miss_limit: 3,
    }
}

pub fn config(backend: BackendKind, workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        backend,
        workers,
        engine: fast_engine_config(),
    }
}

/// A counter pinned to one execution context; the canonical stateful actor.
pub struct CounterActor {
    value: i64,
}

impl CounterActor {
    pub fn create(call: Invocation) -> Result<Box<dyn RemoteActor>, ErrorObject> {
        let start: i64 = if call.args.is_empty() { 0 } else { call.arg(0)? };
        Ok(Box::new(CounterActor { value: start }))
    }
}

#[async_trait]
impl RemoteActor for CounterActor {
    async fn call(&mut self, method: &str, call: Invocation) -> Result<Vec<Bytes>, ErrorObject> {
        match method {
            "increment" => {
                self.value += 1;
                Ok(vec![encode_return(&self.value)?])
            }
            "add" => {
                let delta: i64 = call.arg(0)?;
                self.value += delta;
                Ok(vec![encode_return(&self.value)?])
            }
            // Suspends mid-method; later queued calls must still observe
            // the increment before they run.
            "deferred_increment" => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.value += 1;
                Ok(vec![encode_return(&self.value)?])
            }
            "value" => Ok(vec![encode_return(&self.value)?]),
            "fail" => Err(ErrorObject::new(
                ErrorKind::TaskExecution,
                "counter asked to fail",
            )),
            other => Err(ErrorObject::new(
                ErrorKind::TaskExecution,
                format!("unknown method '{}'", other),
            )),
        }
    }
}

/// Build a runtime with the standard fixture surface registered.
///
/// `execution_counter` observes every invocation of `counted_echo`, so tests
/// can assert a task never executed.
pub async fn test_runtime(
    backend: BackendKind,
    workers: usize,
    execution_counter: Arc<AtomicUsize>,
) -> Runtime {
    Runtime::builder()
        .config(config(backend, workers))
        .register_function("square", |x: i64| x * x)
        .register_function("double", |x: i64| x * 2)
        .register_function("len", |v: Vec<u8>| v.len() as u64)
        .register_function2("add", |a: i64, b: i64| a + b)
        .register_function("slow_echo", |x: i64| {
            std::thread::sleep(Duration::from_millis(150));
            x
        })
        .register_raw("explode", |_call: Invocation| {
            Err::<Vec<Bytes>, _>(ErrorObject::new(
                ErrorKind::TaskExecution,
                "explode always fails",
            ))
        })
        .register_raw("divmod", |call: Invocation| {
            let a: i64 = call.arg(0)?;
            let b: i64 = call.arg(1)?;
            Ok(vec![encode_return(&(a / b))?, encode_return(&(a % b))?])
        })
        .register_raw("counted_echo", move |call: Invocation| {
            execution_counter.fetch_add(1, Ordering::SeqCst);
            let x: i64 = call.arg(0)?;
            Ok(vec![encode_return(&x)?])
        })
        .register_actor("counter", CounterActor::create)
        .build()
        .await
        .expect("runtime starts")
}

/// Backends every scenario should behave identically on.
pub const ALL_BACKENDS: [BackendKind; 3] = [
    BackendKind::MessagePassing,
    BackendKind::ThreadPool,
    BackendKind::Sequential,
];
