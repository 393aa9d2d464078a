//! # Skein Execution Interface
//!
//! The API surface consumed by application code, and the dispatcher that
//! binds it to one of the interchangeable execution backends.
//!
//! There is no global runtime state: a [`Runtime`] is an explicit context
//! object created once at startup and passed to every call, torn down by
//! `shutdown`. The backend is chosen once, at construction, from a closed
//! set of variants: no runtime type inspection, no late rebinding.
//!
//! ```no_run
//! use skein_api::{Args, BackendKind, Runtime, RuntimeConfig};
//!
//! # async fn demo() -> skein_api::Result<()> {
//! let runtime = Runtime::builder()
//!     .config(RuntimeConfig {
//!         backend: BackendKind::MessagePassing,
//!         workers: 4,
//!         ..RuntimeConfig::default()
//!     })
//!     .register_function("square", |x: i64| x * x)
//!     .build()
//!     .await?;
//!
//! let x = runtime.put(&3i64)?;
//! let result = runtime.submit("square", Args::new().reference(&x)).await?;
//! assert_eq!(runtime.get::<i64>(&result, None).await?, 9);
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
mod dispatcher;
pub mod handles;
pub mod runtime;

mod backends {
    pub mod message_passing;
    pub mod pool;
    pub mod sequential;
}

pub use backend::Backend;
pub use backends::message_passing::MessagePassingBackend;
pub use backends::pool::ThreadPoolBackend;
pub use backends::sequential::SequentialBackend;
pub use config::{BackendKind, RuntimeConfig};
pub use handles::{ActorHandle, ObjectRef};
pub use runtime::{Args, Runtime, RuntimeBuilder};

pub use skein_engine::{EngineError as Error, Result};
