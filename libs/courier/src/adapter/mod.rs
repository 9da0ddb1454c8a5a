//! Transport adapters: the boundary between the pipeline and the network.
//!
//! An [`Adapter`] performs one transfer. A [`ParallelAdapter`] takes a batch
//! and yields each `(request, result)` as soon as it finishes, so the client
//! can fire `complete`/`error` per request while the rest are still in flight.

mod concurrent;
mod mock;
mod network;
mod serial;

pub use concurrent::{ConcurrentAdapter, DEFAULT_MAX_CONCURRENCY};
pub use mock::MockAdapter;
pub use network::{HyperAdapter, HyperAdapterBuilder};
pub use serial::SerialAdapter;

use crate::error::HttpError;
use crate::message::{Request, Response};
use crate::outcome::TransferError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::Instrument;

/// Result of a single transfer.
pub type TransferResult = Result<Response, TransferError>;

/// A finished transfer from a batch.
pub type Completion = (Request, TransferResult);

/// Sends one request.
///
/// Implementations must not block the executor; other requests' pipelines
/// keep running while a transfer is in flight.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Perform the transfer.
    ///
    /// # Errors
    /// Returns a [`TransferError`] carrying the cause and any partial response.
    async fn send(&self, request: &Request) -> TransferResult;
}

/// Sends a batch of requests, yielding completions in completion order.
pub trait ParallelAdapter: Send + Sync {
    fn send_all(&self, requests: Vec<Request>) -> BoxStream<'static, Completion>;
}

/// Run one transfer through `adapter`, enforcing the request's timeout.
///
/// # Errors
/// Returns the adapter's error, or [`HttpError::Timeout`] if the request's
/// timeout elapsed first.
pub async fn transfer(adapter: &dyn Adapter, request: &Request) -> TransferResult {
    let span = tracing::debug_span!(
        "outgoing_http",
        request_id = %request.id(),
        method = %request.method(),
        url = %request.url(),
    );

    async {
        let result = match request.config().timeout {
            Some(limit) => tokio::time::timeout(limit, adapter.send(request))
                .await
                .unwrap_or_else(|_| Err(HttpError::Timeout(limit).into())),
            None => adapter.send(request).await,
        };

        match &result {
            Ok(response) => tracing::debug!(status = response.status_code(), "transfer finished"),
            Err(e) => tracing::debug!(error = %e, "transfer failed"),
        }
        result
    }
    .instrument(span)
    .await
}
