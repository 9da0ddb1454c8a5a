use crate::adapter::{self, Adapter};
use crate::message::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;

/// Decides whether a stale cached response may still be served.
#[async_trait]
pub trait Revalidation: Send + Sync {
    /// `true` if `cached` is still valid for `request`. Never fails: any
    /// problem means the entry is treated as stale.
    async fn revalidate(&self, request: &Request, cached: &Response) -> bool;
}

/// Revalidates with a conditional request sent through an adapter.
///
/// Sends `If-None-Match` (from `ETag`) and `If-Modified-Since` (from
/// `Last-Modified`) and accepts the cached response only on `304 Not
/// Modified`. The cached body is never replaced. A cached response without
/// validators is stale without any network access.
pub struct DefaultRevalidation {
    adapter: Arc<dyn Adapter>,
}

impl DefaultRevalidation {
    #[must_use]
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }

    fn conditional_request(request: &Request, cached: &Response) -> Option<Request> {
        let etag = cached.headers().first("ETag");
        let last_modified = cached.headers().first("Last-Modified");
        if etag.is_none() && last_modified.is_none() {
            return None;
        }

        let mut conditional = request.clone();
        conditional.set_body(None);
        for (name, value) in [("If-None-Match", etag), ("If-Modified-Since", last_modified)] {
            if let Some(value) = value
                && let Err(e) = conditional.set_header(name, value)
            {
                tracing::debug!(header = name, error = %e, "Invalid validator on cached response");
                return None;
            }
        }
        Some(conditional)
    }
}

impl std::fmt::Debug for DefaultRevalidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRevalidation").finish_non_exhaustive()
    }
}

#[async_trait]
impl Revalidation for DefaultRevalidation {
    async fn revalidate(&self, request: &Request, cached: &Response) -> bool {
        let Some(conditional) = Self::conditional_request(request, cached) else {
            tracing::debug!(url = %request.url(), "Cached response has no validators; treating as stale");
            return false;
        };

        match adapter::transfer(self.adapter.as_ref(), &conditional).await {
            Ok(response) => {
                tracing::debug!(
                    url = %request.url(),
                    status = response.status_code(),
                    "Revalidation finished"
                );
                response.status_code() == 304
            }
            Err(e) => {
                tracing::debug!(url = %request.url(), error = %e, "Revalidation failed; treating as stale");
                false
            }
        }
    }
}

/// Accepts every stale entry without contacting the origin.
///
/// Serves possibly outdated content; only use it where that is acceptable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipRevalidation;

#[async_trait]
impl Revalidation for SkipRevalidation {
    async fn revalidate(&self, _request: &Request, _cached: &Response) -> bool {
        true
    }
}
