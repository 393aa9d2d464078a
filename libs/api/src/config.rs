//! Runtime configuration.

use serde::Deserialize;
use skein_engine::EngineConfig;

/// The closed set of execution backends.
///
/// Selected once at startup and immutable for the process lifetime. Every
/// variant implements the same operation set with the same observable
/// semantics; callers cannot tell them apart except by performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The controller/worker core over the in-process channel mesh.
    MessagePassing,
    /// OS-thread pool with a shared store; the local-pool analog.
    ThreadPool,
    /// Immediate in-process execution, mostly for tests and debugging.
    Sequential,
}

/// Configuration for a [`crate::Runtime`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub backend: BackendKind,
    /// Worker count (ranks `1..=workers` for the message-passing backend,
    /// pool threads otherwise). Ignored by the sequential backend.
    pub workers: usize,
    /// Core engine tuning; only the message-passing backend reads it.
    pub engine: EngineConfig,
}

impl RuntimeConfig {
    pub const DEFAULT_WORKERS: usize = 4;
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::MessagePassing,
            workers: Self::DEFAULT_WORKERS,
            engine: EngineConfig::default(),
        }
    }
}
