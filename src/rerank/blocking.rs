//! Running reranks from async hosts.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::types::Ranked;

use super::kwiksort::{KwikSort, RerankError};
use super::trace::TraceSink;

/// Run `sorter` on tokio's blocking pool, optionally bounded by `timeout`.
///
/// A timed-out rerank keeps running on its blocking thread until it
/// finishes; only the caller stops waiting for it.
pub async fn rerank_blocking<I, O>(
    sorter: Arc<KwikSort<I, O>>,
    input: I,
    outputs: Vec<O>,
    trace: Option<Arc<dyn TraceSink>>,
    timeout: Option<Duration>,
) -> Result<Vec<O>, RerankError>
where
    I: Send + Sync + 'static,
    O: Ranked + Clone + Send + Sync + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        sorter.rerank_with_trace(&input, &outputs, trace.as_deref())
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(timeout = ?limit, "rerank timed out");
                return Err(RerankError::Timeout(limit));
            }
        },
        None => task.await,
    };

    joined.map_err(|e| RerankError::Join(e.to_string()))?
}
