//! Function and actor type registries.
//!
//! Skein never ships code: every rank registers the same callables under the
//! same descriptors before the runtime starts, and only descriptors plus
//! serialized arguments cross the wire. An unregistered descriptor fails the
//! task that names it, nothing else.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use skein_codec::{deserialize_value, serialize_value};
use skein_types::{ErrorKind, ErrorObject};
use std::sync::Arc;

/// Materialized arguments for one call: positional payloads plus named
/// payloads, already resolved from any object references.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub args: Vec<Bytes>,
    pub kwargs: Vec<(String, Bytes)>,
}

impl Invocation {
    /// Decode positional argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ErrorObject> {
        let payload = self.args.get(index).ok_or_else(|| {
            ErrorObject::new(
                ErrorKind::TaskExecution,
                format!("missing positional argument {}", index),
            )
        })?;
        deserialize_value(payload).map_err(serialization_failure)
    }

    /// Decode named argument `name`.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T, ErrorObject> {
        let payload = self
            .kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                ErrorObject::new(
                    ErrorKind::TaskExecution,
                    format!("missing keyword argument '{}'", name),
                )
            })?;
        deserialize_value(payload).map_err(serialization_failure)
    }
}

fn serialization_failure(err: skein_codec::CodecError) -> ErrorObject {
    ErrorObject::new(ErrorKind::Serialization, err.to_string())
}

/// Encode one return value for the object store.
pub fn encode_return<T: Serialize>(value: &T) -> Result<Bytes, ErrorObject> {
    serialize_value(value).map_err(serialization_failure)
}

/// A callable registered for pool execution.
pub trait RemoteFunction: Send + Sync {
    /// Run with materialized arguments; return one payload per declared
    /// result. A returned `ErrorObject` is captured on the output refs.
    fn invoke(&self, call: Invocation) -> Result<Vec<Bytes>, ErrorObject>;
}

impl<F> RemoteFunction for F
where
    F: Fn(Invocation) -> Result<Vec<Bytes>, ErrorObject> + Send + Sync,
{
    fn invoke(&self, call: Invocation) -> Result<Vec<Bytes>, ErrorObject> {
        self(call)
    }
}

/// Descriptor → callable map, identical on every rank.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<dyn RemoteFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw callable working directly on payloads.
    pub fn register(&self, name: impl Into<String>, function: impl RemoteFunction + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Register a single-result function of one typed argument.
    pub fn register1<A, R>(&self, name: impl Into<String>, f: impl Fn(A) -> R + Send + Sync + 'static)
    where
        A: DeserializeOwned,
        R: Serialize,
    {
        self.register(name, move |call: Invocation| {
            let a: A = call.arg(0)?;
            Ok(vec![encode_return(&f(a))?])
        });
    }

    /// Register a single-result function of two typed arguments.
    pub fn register2<A, B, R>(
        &self,
        name: impl Into<String>,
        f: impl Fn(A, B) -> R + Send + Sync + 'static,
    ) where
        A: DeserializeOwned,
        B: DeserializeOwned,
        R: Serialize,
    {
        self.register(name, move |call: Invocation| {
            let a: A = call.arg(0)?;
            let b: B = call.arg(1)?;
            Ok(vec![encode_return(&f(a, b))?])
        });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteFunction>> {
        self.functions.get(name).map(|f| Arc::clone(f.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

/// A stateful remote object pinned to one worker.
///
/// Methods are async so an implementation may suspend cooperatively
/// (awaiting mid-method). The hosting worker serializes calls: suspension
/// never lets a later queued call overtake the suspended one.
#[async_trait]
pub trait RemoteActor: Send {
    async fn call(&mut self, method: &str, call: Invocation) -> Result<Vec<Bytes>, ErrorObject>;
}

/// Constructs actor instances of one registered type.
pub trait ActorFactory: Send + Sync {
    fn create(&self, call: Invocation) -> Result<Box<dyn RemoteActor>, ErrorObject>;
}

impl<F> ActorFactory for F
where
    F: Fn(Invocation) -> Result<Box<dyn RemoteActor>, ErrorObject> + Send + Sync,
{
    fn create(&self, call: Invocation) -> Result<Box<dyn RemoteActor>, ErrorObject> {
        self(call)
    }
}

/// Actor type descriptor → factory map, identical on every rank.
#[derive(Default)]
pub struct ActorTypeRegistry {
    factories: DashMap<String, Arc<dyn ActorFactory>>,
}

impl ActorTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, factory: impl ActorFactory + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActorFactory>> {
        self.factories.get(name).map(|f| Arc::clone(f.value()))
    }
}

impl std::fmt::Debug for ActorTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorTypeRegistry")
            .field("factories", &self.factories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_registration_and_invocation() {
        let registry = FunctionRegistry::new();
        registry.register1("square", |x: i64| x * x);

        let call = Invocation {
            args: vec![serialize_value(&7i64).unwrap()],
            kwargs: vec![],
        };
        let outputs = registry.get("square").unwrap().invoke(call).unwrap();
        let result: i64 = deserialize_value(&outputs[0]).unwrap();
        assert_eq!(result, 49);
    }

    #[test]
    fn missing_argument_is_a_task_error() {
        let registry = FunctionRegistry::new();
        registry.register2("add", |a: i64, b: i64| a + b);

        let call = Invocation {
            args: vec![serialize_value(&1i64).unwrap()],
            kwargs: vec![],
        };
        let err = registry.get("add").unwrap().invoke(call).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TaskExecution);
    }

    #[test]
    fn wrong_payload_type_is_a_serialization_error() {
        let registry = FunctionRegistry::new();
        registry.register1("len", |s: String| s.len() as u64);

        let call = Invocation {
            args: vec![serialize_value(&3.5f64).unwrap()],
            kwargs: vec![],
        };
        let err = registry.get("len").unwrap().invoke(call).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Serialization);
    }
}
