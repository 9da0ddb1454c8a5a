use super::{CacheEntry, CacheStore, Fingerprint, Revalidation};
use crate::error::BoxError;
use crate::event::{BeforeEvent, CompleteEvent, EventName, PRIORITY_LATE, Subscriber};
use crate::message::Request;
use async_trait::async_trait;
use http::Method;
use std::sync::Arc;
use std::time::SystemTime;

/// Header marking responses served from the cache
pub const CACHE_HEADER: &str = "X-Cache";

/// Request config key; `false` bypasses the cache for that request
pub const CACHE_CONFIG_KEY: &str = "cache";

/// Request config key set while a request is answered from the store
const SERVED_KEY: &str = "cache.served";

/// Private HTTP cache.
///
/// On `before`, GET and HEAD requests are answered from the store when the
/// entry is fresh, or stale but accepted by the [`Revalidation`] strategy.
/// Such responses carry `X-Cache: HIT`. On `complete`, storable responses
/// are saved and successful unsafe requests (POST, PUT, PATCH, DELETE)
/// evict the GET entry for their URL.
pub struct CacheSubscriber {
    store: Arc<dyn CacheStore>,
    revalidation: Arc<dyn Revalidation>,
}

impl CacheSubscriber {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, revalidation: Arc<dyn Revalidation>) -> Self {
        Self {
            store,
            revalidation,
        }
    }

    fn is_enabled(request: &Request) -> bool {
        request
            .config()
            .get(CACHE_CONFIG_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

impl std::fmt::Debug for CacheSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSubscriber").finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscriber for CacheSubscriber {
    fn events(&self) -> Vec<(EventName, i32)> {
        vec![
            (EventName::Before, PRIORITY_LATE),
            (EventName::Complete, PRIORITY_LATE),
        ]
    }

    async fn on_before(&self, event: &mut BeforeEvent) -> Result<(), BoxError> {
        event.request_mut().config_mut().remove(SERVED_KEY);
        let request = event.request();
        if event.is_intercepted()
            || !Self::is_enabled(request)
            || !matches!(*request.method(), Method::GET | Method::HEAD)
        {
            return Ok(());
        }

        let key = Fingerprint::of(request);
        let Some(entry) = self.store.get(key) else {
            return Ok(());
        };
        if !entry.matches(request) {
            return Ok(());
        }

        let now = SystemTime::now();
        if !entry.is_fresh(now) {
            if !self.revalidation.revalidate(request, entry.response()).await {
                tracing::debug!(fingerprint = %key, url = %request.url(), "Stale cache entry dropped");
                self.store.delete(key);
                return Ok(());
            }
            self.store.put(key, entry.clone().with_stored_at(now));
        }

        tracing::debug!(fingerprint = %key, url = %request.url(), "Serving from cache");
        let mut response = entry.response().clone();
        response.headers_mut().set(CACHE_HEADER, "HIT")?;
        event
            .request_mut()
            .config_mut()
            .set(SERVED_KEY, serde_json::Value::Bool(true));
        event.intercept(response);
        Ok(())
    }

    async fn on_complete(&self, event: &mut CompleteEvent) -> Result<(), BoxError> {
        let served = event.request_mut().config_mut().remove(SERVED_KEY).is_some();
        let (request, response) = (event.request(), event.response());
        if served || event.is_retrying() || !Self::is_enabled(request) {
            return Ok(());
        }

        let method = request.method();
        if !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE) {
            if response.is_success() && self.store.delete(Fingerprint::new(&Method::GET, &request.url())) {
                tracing::debug!(url = %request.url(), method = %method, "Invalidated cache entry");
            }
            return Ok(());
        }

        if CacheEntry::is_storable(request, response) {
            let key = Fingerprint::of(request);
            tracing::debug!(fingerprint = %key, url = %request.url(), "Storing response in cache");
            self.store.put(key, CacheEntry::new(request, response.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCacheStore, SkipRevalidation};
    use crate::message::Response;
    use http::StatusCode;
    use std::time::Duration;

    struct Never;

    #[async_trait]
    impl Revalidation for Never {
        async fn revalidate(&self, _request: &Request, _cached: &Response) -> bool {
            false
        }
    }

    fn get(url: &str) -> Request {
        Request::new(Method::GET, url).unwrap()
    }

    fn cacheable() -> Response {
        Response::new(StatusCode::OK)
            .with_header("Cache-Control", "max-age=60")
            .unwrap()
            .with_body("payload")
    }

    async fn store_via_complete(cache: &CacheSubscriber, request: Request, response: Response) {
        let mut event = CompleteEvent::new(request, response);
        cache.on_complete(&mut event).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_entry_served_with_hit_header() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = CacheSubscriber::new(store.clone(), Arc::new(Never));
        store_via_complete(&cache, get("http://example.com/a"), cacheable()).await;
        assert_eq!(store.len(), 1);

        let mut event = BeforeEvent::new(get("http://example.com/a"));
        cache.on_before(&mut event).await.unwrap();
        let response = event.intercepted_response().unwrap();
        assert_eq!(response.headers().first(CACHE_HEADER), Some("HIT"));
        assert_eq!(response.body().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_served_entry_not_stored_again() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = CacheSubscriber::new(store.clone(), Arc::new(Never));
        let request = get("http://example.com/a");
        let key = Fingerprint::of(&request);
        let old = SystemTime::now().checked_sub(Duration::from_secs(10)).unwrap();
        store.put(key, CacheEntry::new(&request, cacheable()).with_stored_at(old));

        let mut before = BeforeEvent::new(request);
        cache.on_before(&mut before).await.unwrap();
        let response = before.intercepted_response().unwrap().clone();
        let mut complete = CompleteEvent::new(before.request().clone(), response);
        cache.on_complete(&mut complete).await.unwrap();

        assert_eq!(store.get(key).unwrap().stored_at(), old);
        assert!(!complete.request().config().has(SERVED_KEY));
    }

    #[tokio::test]
    async fn test_miss_passes_through() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = CacheSubscriber::new(store, Arc::new(Never));

        let mut event = BeforeEvent::new(get("http://example.com/a"));
        cache.on_before(&mut event).await.unwrap();
        assert!(!event.is_intercepted());
        assert!(!event.request().config().has(SERVED_KEY));
    }

    #[tokio::test]
    async fn test_upstream_cache_header_still_stored() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = CacheSubscriber::new(store.clone(), Arc::new(Never));

        let upstream = cacheable().with_header(CACHE_HEADER, "MISS").unwrap();
        store_via_complete(&cache, get("http://example.com/a"), upstream).await;
        assert_eq!(store.len(), 1);

        let mut event = BeforeEvent::new(get("http://example.com/a"));
        cache.on_before(&mut event).await.unwrap();
        let response = event.intercepted_response().unwrap();
        assert_eq!(response.headers().first(CACHE_HEADER), Some("HIT"));
    }

    #[tokio::test]
    async fn test_stale_entry_revalidated_or_dropped() {
        let store = Arc::new(InMemoryCacheStore::default());
        let request = get("http://example.com/a");
        let key = Fingerprint::of(&request);
        let stale = CacheEntry::new(&request, cacheable())
            .with_stored_at(SystemTime::now().checked_sub(Duration::from_secs(3600)).unwrap());

        store.put(key, stale.clone());
        let skip = CacheSubscriber::new(store.clone(), Arc::new(SkipRevalidation));
        let mut event = BeforeEvent::new(request.clone());
        skip.on_before(&mut event).await.unwrap();
        assert!(event.is_intercepted());
        assert!(store.get(key).unwrap().is_fresh(SystemTime::now()));

        store.put(key, stale);
        let never = CacheSubscriber::new(store.clone(), Arc::new(Never));
        let mut event = BeforeEvent::new(request);
        never.on_before(&mut event).await.unwrap();
        assert!(!event.is_intercepted());
        assert!(store.get(key).is_none());
    }

    #[tokio::test]
    async fn test_disabled_per_request() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = CacheSubscriber::new(store.clone(), Arc::new(SkipRevalidation));

        let mut request = get("http://example.com/a");
        request.config_mut().set(CACHE_CONFIG_KEY, serde_json::Value::Bool(false));
        store_via_complete(&cache, request, cacheable()).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_method_invalidates() {
        let store = Arc::new(InMemoryCacheStore::default());
        let cache = CacheSubscriber::new(store.clone(), Arc::new(SkipRevalidation));
        store_via_complete(&cache, get("http://example.com/a"), cacheable()).await;

        let post = Request::new(Method::POST, "http://example.com/a").unwrap();
        store_via_complete(&cache, post, Response::new(StatusCode::CREATED)).await;
        assert!(store.is_empty());
    }
}
