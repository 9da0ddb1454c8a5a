#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Pipeline tests against in-process adapters

use async_trait::async_trait;
use courier::adapter::TransferResult;
use courier::cache::{CACHE_HEADER, CacheSubscriber, DefaultRevalidation, InMemoryCacheStore};
use courier::subscriber::{HistorySubscriber, MockSubscriber, RETRY_ATTEMPT_HEADER};
use courier::{
    Adapter, Client, ConcurrentAdapter, ExponentialBackoff, FailureKind, HttpError, MockAdapter,
    Outcome, Request, RequestOptions, Response, RetryConfig,
};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn client(adapter: &Arc<MockAdapter>) -> Client {
    Client::builder()
        .base_url("http://api.example.com/")
        .adapter(adapter.clone())
        .build()
        .unwrap()
}

fn echo_path() -> MockAdapter {
    MockAdapter::from_fn(|request| Ok(Response::new(StatusCode::OK).with_body(request.path().to_owned())))
}

fn count_ends(client: &Client) -> Arc<AtomicUsize> {
    let ends = Arc::new(AtomicUsize::new(0));
    let counter = ends.clone();
    client.emitter().on_end(0, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    ends
}

#[tokio::test]
async fn test_before_intercept_skips_adapter() {
    let adapter = Arc::new(MockAdapter::new());
    let client = client(&adapter);
    client.emitter().on_before(0, |event| {
        event.intercept(Response::new(StatusCode::ACCEPTED).with_body("cached"));
        Ok(())
    });

    let response = client.get("items", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.text(), "cached");
    assert!(adapter.received().is_empty());
}

#[tokio::test]
async fn test_transport_failure_raised_or_returned() {
    let adapter = Arc::new(
        MockAdapter::new()
            .with_error(HttpError::Transport("connection refused".into()))
            .with_error(HttpError::Transport("connection refused".into())),
    );
    let client = client(&adapter);

    let err = client.get("a", RequestOptions::new()).await.unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.kind(), FailureKind::Transport);
    assert!(failure.cause().is_transport());
    assert_eq!(failure.request().path(), "/a");

    let outcome = client.get("b", RequestOptions::new().exceptions(false)).await.unwrap();
    assert!(outcome.is_failure());
    assert_eq!(outcome.failure().unwrap().kind(), FailureKind::Transport);
}

#[tokio::test]
async fn test_error_subscriber_recovers_with_fallback() {
    let adapter = Arc::new(MockAdapter::new().with_error(HttpError::Transport("reset".into())));
    let client = client(&adapter);
    client.emitter().on_error(0, |event| {
        event.intercept(Response::new(StatusCode::OK).with_body("fallback"));
        Ok(())
    });

    let response = client.get("a", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert_eq!(response.text(), "fallback");
}

#[tokio::test]
async fn test_send_all_pairs_outcomes_with_requests() {
    let adapter = Arc::new(echo_path());
    let client = client(&adapter);

    let requests: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|path| client.create_request(Method::GET, path, RequestOptions::new()).unwrap())
        .collect();
    let transaction = client.send_all(requests.clone()).await;

    assert_eq!(transaction.len(), 3);
    assert!(!transaction.has_failures());
    for request in &requests {
        let response = transaction.get(request).unwrap().response().unwrap();
        assert_eq!(response.text(), request.path());
    }
}

/// Echoes the path, holding `/slow` back so it finishes after the rest.
#[derive(Default)]
struct SlowFirst {
    finished: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl Adapter for SlowFirst {
    async fn send(&self, request: &Request) -> TransferResult {
        if request.path() == "/slow" {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.finished.lock().push(request.path().to_owned());
        Ok(Response::new(StatusCode::OK).with_body(request.path().to_owned()))
    }
}

#[tokio::test]
async fn test_send_all_pairs_out_of_order_completions() {
    let adapter = Arc::new(SlowFirst::default());
    let client = Client::builder()
        .base_url("http://api.example.com/")
        .parallel_adapter(Arc::new(ConcurrentAdapter::new(adapter.clone(), 4)))
        .build()
        .unwrap();

    let requests: Vec<_> = ["slow", "a", "b", "c"]
        .into_iter()
        .map(|path| client.create_request(Method::GET, path, RequestOptions::new()).unwrap())
        .collect();
    let transaction = client.send_all(requests.clone()).await;

    let finished = adapter.finished.lock().clone();
    assert_eq!(finished.len(), 4);
    assert_eq!(finished.last().map(String::as_str), Some("/slow"));
    assert_eq!(transaction.len(), 4);
    for request in &requests {
        let response = transaction.get(request).unwrap().response().unwrap();
        assert_eq!(response.text(), request.path());
    }
}

#[tokio::test]
async fn test_send_all_records_failures_and_dedupes() {
    let adapter = Arc::new(MockAdapter::from_fn(|request| {
        if request.path() == "/broken" {
            Err(HttpError::Transport("refused".into()).into())
        } else {
            Ok(Response::new(StatusCode::OK))
        }
    }));
    let client = client(&adapter);

    let ok = client.create_request(Method::GET, "fine", RequestOptions::new()).unwrap();
    let broken = client.create_request(Method::GET, "broken", RequestOptions::new()).unwrap();
    let transaction = client.send_all(vec![ok.clone(), broken.clone(), ok.clone()]).await;

    assert_eq!(transaction.len(), 2);
    assert_eq!(adapter.received().len(), 2);
    assert!(transaction.get(&broken).unwrap().is_failure());
    assert!(!transaction.get(&ok).unwrap().is_failure());
    assert_eq!(transaction.failures().count(), 1);
}

#[tokio::test]
async fn test_send_all_before_intercept_and_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let adapter = Arc::new(MockAdapter::from_fn(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Response::new(StatusCode::SERVICE_UNAVAILABLE))
        } else {
            Ok(Response::new(StatusCode::OK))
        }
    }));
    let client = Client::builder()
        .base_url("http://api.example.com/")
        .adapter(adapter.clone())
        .retry(RetryConfig {
            backoff: ExponentialBackoff::fast(),
            ..Default::default()
        })
        .build()
        .unwrap();
    client.emitter().on_before(0, |event| {
        if event.request().path() == "/local" {
            event.intercept(Response::new(StatusCode::NO_CONTENT));
        }
        Ok(())
    });

    let remote = client.create_request(Method::GET, "remote", RequestOptions::new()).unwrap();
    let local = client.create_request(Method::GET, "local", RequestOptions::new()).unwrap();
    let transaction = client.send_all(vec![remote.clone(), local.clone()]).await;

    let remote_response = transaction.get(&remote).unwrap().response().unwrap();
    assert_eq!(remote_response.status(), StatusCode::OK);
    let local_response = transaction.get(&local).unwrap().response().unwrap();
    assert_eq!(local_response.status(), StatusCode::NO_CONTENT);
    assert_eq!(adapter.received().len(), 2);
}

#[tokio::test]
async fn test_retry_until_success() {
    let adapter = Arc::new(MockAdapter::new().with_responses([
        Response::new(StatusCode::SERVICE_UNAVAILABLE),
        Response::new(StatusCode::BAD_GATEWAY),
        Response::new(StatusCode::OK),
    ]));
    let client = Client::builder()
        .adapter(adapter.clone())
        .retry(RetryConfig {
            backoff: ExponentialBackoff::fast(),
            ..Default::default()
        })
        .build()
        .unwrap();

    let response = client
        .get("http://api.example.com/flaky", RequestOptions::new())
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sent = adapter.received();
    assert_eq!(sent.len(), 3);
    assert!(!sent[0].headers().has(RETRY_ATTEMPT_HEADER));
    assert_eq!(sent[1].headers().first(RETRY_ATTEMPT_HEADER), Some("1"));
    assert_eq!(sent[2].headers().first(RETRY_ATTEMPT_HEADER), Some("2"));
}

#[tokio::test]
async fn test_redirect_followed_to_final_response() {
    let adapter = Arc::new(MockAdapter::from_fn(|request| match request.path() {
        "/old" => Ok(Response::new(StatusCode::FOUND).with_header("Location", "/new").unwrap()),
        _ => Ok(Response::new(StatusCode::OK).with_body("moved")),
    }));
    let client = client(&adapter);

    let response = client.get("old", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert_eq!(response.text(), "moved");
    assert_eq!(response.effective_url(), Some("http://api.example.com/new"));
    assert_eq!(adapter.received().len(), 2);

    let response = client
        .get("old", RequestOptions::new().allow_redirects(false))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_cross_origin_redirect_drops_credentials() {
    let adapter = Arc::new(MockAdapter::from_fn(|request| match request.host() {
        Some("api.example.com") => Ok(Response::new(StatusCode::TEMPORARY_REDIRECT)
            .with_header("Location", "http://other.example.org/landing")
            .unwrap()),
        _ => Ok(Response::new(StatusCode::OK)),
    }));
    let client = client(&adapter);

    client
        .get(
            "start",
            RequestOptions::new()
                .header("Authorization", "Bearer secret")
                .header("Cookie", "session=1"),
        )
        .await
        .unwrap();

    let sent = adapter.received();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].headers().has("Authorization"));
    assert_eq!(sent[1].host(), Some("other.example.org"));
    assert!(!sent[1].headers().has("Authorization"));
    assert!(!sent[1].headers().has("Cookie"));
}

#[tokio::test]
async fn test_cache_serves_second_request() {
    let adapter = Arc::new(MockAdapter::new().with_response(
        Response::new(StatusCode::OK)
            .with_header("Cache-Control", "max-age=300")
            .unwrap()
            .with_body("fresh"),
    ));
    let cache = CacheSubscriber::new(
        Arc::new(InMemoryCacheStore::default()),
        Arc::new(DefaultRevalidation::new(adapter.clone())),
    );
    let client = Client::builder()
        .base_url("http://api.example.com/")
        .adapter(adapter.clone())
        .subscriber(Arc::new(cache))
        .build()
        .unwrap();

    let first = client.get("doc", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert!(!first.headers().has(CACHE_HEADER));

    let second = client.get("doc", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert_eq!(second.headers().first(CACHE_HEADER), Some("HIT"));
    assert_eq!(second.text(), "fresh");
    assert_eq!(adapter.received().len(), 1);
}

#[tokio::test]
async fn test_cache_stores_response_with_upstream_cache_header() {
    let adapter = Arc::new(MockAdapter::new().with_response(
        Response::new(StatusCode::OK)
            .with_header("Cache-Control", "max-age=300")
            .unwrap()
            .with_header(CACHE_HEADER, "MISS")
            .unwrap()
            .with_body("from origin"),
    ));
    let cache = CacheSubscriber::new(
        Arc::new(InMemoryCacheStore::default()),
        Arc::new(DefaultRevalidation::new(adapter.clone())),
    );
    let client = Client::builder()
        .base_url("http://api.example.com/")
        .adapter(adapter.clone())
        .subscriber(Arc::new(cache))
        .build()
        .unwrap();

    let first = client.get("doc", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert_eq!(first.headers().first(CACHE_HEADER), Some("MISS"));

    let second = client.get("doc", RequestOptions::new()).await.unwrap().into_result().unwrap();
    assert_eq!(second.headers().first(CACHE_HEADER), Some("HIT"));
    assert_eq!(second.text(), "from origin");
    assert_eq!(adapter.received().len(), 1);
}

#[tokio::test]
async fn test_history_records_every_request() {
    let adapter = Arc::new(
        MockAdapter::new()
            .with_response(Response::new(StatusCode::OK))
            .with_error(HttpError::Transport("refused".into())),
    );
    let history = Arc::new(HistorySubscriber::new(5));
    let client = Client::builder()
        .base_url("http://api.example.com/")
        .adapter(adapter)
        .subscriber(history.clone())
        .exceptions(false)
        .build()
        .unwrap();

    client.get("a", RequestOptions::new()).await.unwrap();
    client.get("b", RequestOptions::new()).await.unwrap();

    let entries = history.entries();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].is_failure());
    assert_eq!(entries[0].request.path(), "/a");
    assert!(entries[1].is_failure());
    assert_eq!(entries[1].failure.as_ref().map(|(kind, _)| *kind), Some(FailureKind::Transport));
}

#[tokio::test]
async fn test_mock_subscriber_answers_without_adapter() {
    let adapter = Arc::new(MockAdapter::new());
    let mock = Arc::new(MockSubscriber::with_responses([Response::new(StatusCode::CREATED)]));
    let client = Client::builder()
        .adapter(adapter.clone())
        .subscriber(mock.clone())
        .build()
        .unwrap();

    let outcome = client.post("http://api.example.com/users", RequestOptions::new()).await.unwrap();
    assert_eq!(outcome.response().unwrap().status(), StatusCode::CREATED);
    assert_eq!(mock.remaining(), 0);

    let err = client.post("http://api.example.com/users", RequestOptions::new()).await.unwrap_err();
    assert_eq!(err.failure().unwrap().kind(), FailureKind::RequestFailed);
    assert!(adapter.received().is_empty());
}

#[tokio::test]
async fn test_end_emitted_once_per_request() {
    let adapter = Arc::new(
        MockAdapter::new()
            .with_response(Response::new(StatusCode::OK))
            .with_error(HttpError::Transport("refused".into())),
    );
    let client = client(&adapter);
    let ends = count_ends(&client);

    client.get("ok", RequestOptions::new()).await.unwrap();
    assert_eq!(ends.load(Ordering::SeqCst), 1);

    client.get("fail", RequestOptions::new()).await.unwrap_err();
    assert_eq!(ends.load(Ordering::SeqCst), 2);

    client.emitter().on_before(0, |event| {
        event.cancel("not today");
        Ok(())
    });
    let outcome = client.get("cancelled", RequestOptions::new().exceptions(false)).await.unwrap();
    assert!(matches!(outcome, Outcome::Failure(_)));
    assert_eq!(ends.load(Ordering::SeqCst), 3);
}
