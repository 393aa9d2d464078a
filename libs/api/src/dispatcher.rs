//! Backend dispatcher: one-shot selection from the closed variant set.

use skein_engine::{ActorTypeRegistry, FunctionRegistry, Result};
use std::sync::Arc;
use tracing::info;

use crate::backend::Backend;
use crate::backends::message_passing::MessagePassingBackend;
use crate::backends::pool::ThreadPoolBackend;
use crate::backends::sequential::SequentialBackend;
use crate::config::{BackendKind, RuntimeConfig};

/// Construct the selected backend. Called exactly once per runtime; the
/// choice is immutable afterwards.
///
/// Returns the uniform handle plus, for the message-passing variant, the
/// concrete backend (failure injection needs it; nothing else does).
pub(crate) async fn dispatch(
    config: &RuntimeConfig,
    functions: Arc<FunctionRegistry>,
    actor_types: Arc<ActorTypeRegistry>,
) -> Result<(Arc<dyn Backend>, Option<Arc<MessagePassingBackend>>)> {
    info!(backend = ?config.backend, workers = config.workers, "selecting backend");
    Ok(match config.backend {
        BackendKind::MessagePassing => {
            let backend = MessagePassingBackend::start(config, functions, actor_types).await?;
            (Arc::clone(&backend) as Arc<dyn Backend>, Some(backend))
        }
        BackendKind::ThreadPool => {
            let backend = ThreadPoolBackend::start(config, functions, actor_types)?;
            (backend as Arc<dyn Backend>, None)
        }
        BackendKind::Sequential => {
            let backend = SequentialBackend::start(functions, actor_types);
            (backend as Arc<dyn Backend>, None)
        }
    })
}
