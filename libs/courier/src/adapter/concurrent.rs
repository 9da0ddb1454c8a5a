use super::{Adapter, Completion, ParallelAdapter, transfer};
use crate::error::HttpError;
use crate::message::Request;
use crate::outcome::TransferError;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::sync::Arc;

/// Default number of transfers allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 50;

/// Batch adapter running up to `max_concurrency` transfers on spawned tasks.
///
/// Completions are yielded as they finish; their order is unrelated to the
/// input order. A failing or panicking transfer only affects its own request.
#[derive(Clone)]
pub struct ConcurrentAdapter {
    adapter: Arc<dyn Adapter>,
    max_concurrency: usize,
}

impl ConcurrentAdapter {
    /// Wrap `adapter`. A `max_concurrency` of 0 is clamped to 1.
    #[must_use]
    pub fn new(adapter: Arc<dyn Adapter>, max_concurrency: usize) -> Self {
        Self {
            adapter,
            max_concurrency: max_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

impl ParallelAdapter for ConcurrentAdapter {
    fn send_all(&self, requests: Vec<Request>) -> BoxStream<'static, Completion> {
        let adapter = Arc::clone(&self.adapter);
        tracing::debug!(
            batch = requests.len(),
            max_concurrency = self.max_concurrency,
            "dispatching batch"
        );

        stream::iter(requests)
            .map(move |request| {
                let adapter = Arc::clone(&adapter);
                let fallback = request.clone();
                async move {
                    let handle = tokio::spawn(async move {
                        let result = transfer(adapter.as_ref(), &request).await;
                        (request, result)
                    });
                    match handle.await {
                        Ok(completion) => completion,
                        Err(join_err) => {
                            tracing::error!(
                                request_id = %fallback.id(),
                                error = %join_err,
                                "transfer task aborted"
                            );
                            let cause = HttpError::Transport(Box::new(join_err));
                            (fallback, Err(TransferError::from(cause)))
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .boxed()
    }
}
