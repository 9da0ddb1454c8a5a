use crate::adapter::{self, Adapter, ParallelAdapter, TransferResult};
use crate::builder::ClientBuilder;
use crate::config::{RequestDefaults, UrlTemplate};
use crate::error::{HttpError, InvalidUriKind};
use crate::event::{BeforeAction, BeforeEvent, CompleteEvent, Emitter, EndEvent, ErrorEvent, ErrorResolution};
use crate::factory::MessageFactory;
use crate::message::{Request, RequestId, Response};
use crate::options::RequestOptions;
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::transaction::Transaction;
use futures::StreamExt;
use futures::stream;
use http::Method;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;

/// Times a single request may enter `before` (the first send plus retries and redirects).
pub const MAX_ATTEMPTS: usize = 32;

/// Pipeline steps allowed per request, bounding `complete`/`error` ping-pong.
const MAX_STEPS: usize = MAX_ATTEMPTS * 4;

/// Event-driven HTTP client.
///
/// Each request goes through `before`, the transport (unless a subscriber
/// intercepted it), `complete` or `error`, and finally `end`. Subscribers
/// attached to the client's [`Emitter`] can rewrite, short-circuit, retry or
/// fail requests at each phase without the client knowing about them.
///
/// `Client` is cheap to clone; clones share configuration, adapters and
/// subscribers.
///
/// # Example
///
/// ```no_run
/// use courier::{Client, RequestOptions};
///
/// # async fn run() -> Result<(), courier::HttpError> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/v1/")
///     .build()?;
///
/// let outcome = client
///     .get("users", RequestOptions::new().query("page", "2"))
///     .await?;
/// let users: serde_json::Value = outcome.into_result()?.json()?;
/// # let _ = users;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Option<Url>,
    defaults: RequestDefaults,
    adapter: Arc<dyn Adapter>,
    parallel_adapter: Arc<dyn ParallelAdapter>,
    message_factory: Arc<dyn MessageFactory>,
    emitter: Emitter,
    max_concurrency: usize,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("defaults", &self.inner.defaults)
            .field("max_concurrency", &self.inner.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// Where a request is in its lifecycle.
enum Step {
    Before(Request),
    Transfer(Request),
    Complete(Request, Response),
    Error {
        request: Request,
        kind: FailureKind,
        cause: HttpError,
        response: Option<Response>,
    },
    Done(Request, Outcome),
}

impl Step {
    fn transferred(request: Request, result: TransferResult) -> Self {
        match result {
            Ok(response) => Step::Complete(request, response),
            Err(err) => Step::Error {
                request,
                kind: FailureKind::Transport,
                cause: err.cause,
                response: err.response,
            },
        }
    }

    /// Final failure, skipping the `error` phase.
    fn failed(
        request: Request,
        kind: FailureKind,
        cause: HttpError,
        response: Option<Response>,
    ) -> Self {
        let failure = Failure::new(kind, request.clone(), cause, response);
        Step::Done(request, Outcome::Failure(failure))
    }

    fn into_request(self) -> Request {
        match self {
            Step::Before(request)
            | Step::Transfer(request)
            | Step::Complete(request, _)
            | Step::Error { request, .. }
            | Step::Done(request, _) => request,
        }
    }
}

/// Where the event phases stopped: waiting for the transport, or finished.
enum Halt {
    Transfer(Request),
    Done(Request, Outcome),
}

/// A request after its event phases ran: finished (after `end`) or awaiting transfer.
enum Settled {
    Finished(Request, Outcome),
    Transfer(Request, Progress),
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    attempts: usize,
    steps: usize,
}

impl Client {
    /// Client with default configuration and the network adapter.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails.
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn assemble(
        base_url: Option<Url>,
        defaults: RequestDefaults,
        adapter: Arc<dyn Adapter>,
        parallel_adapter: Arc<dyn ParallelAdapter>,
        message_factory: Arc<dyn MessageFactory>,
        emitter: Emitter,
        max_concurrency: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                base_url,
                defaults,
                adapter,
                parallel_adapter,
                message_factory,
                emitter,
                max_concurrency: max_concurrency.max(1),
            }),
        }
    }

    /// Subscribers attached here see every request sent by this client and its clones.
    #[must_use]
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&Url> {
        self.inner.base_url.as_ref()
    }

    #[must_use]
    pub fn defaults(&self) -> &RequestDefaults {
        &self.inner.defaults
    }

    #[must_use]
    pub fn message_factory(&self) -> &dyn MessageFactory {
        self.inner.message_factory.as_ref()
    }

    /// Build a request without sending it.
    ///
    /// `url` is resolved against the base URL: absolute URLs are used as is,
    /// relative ones are joined per RFC 3986 and an empty URL means the base
    /// URL itself. Both may be `(template, variables)` pairs.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidUri`] if the URL cannot be resolved, or an
    /// invalid-input error for malformed options.
    pub fn create_request(
        &self,
        method: Method,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Request, HttpError> {
        let url = self.resolve_url(&url.into().expand()?)?;
        self.inner
            .message_factory
            .create_request(method, url, &self.inner.defaults, options)
    }

    fn resolve_url(&self, url: &str) -> Result<Url, HttpError> {
        let parse_error = |e: url::ParseError| HttpError::invalid_uri(url, InvalidUriKind::ParseError, e);

        match &self.inner.base_url {
            Some(base) if url.is_empty() => Ok(base.clone()),
            Some(base) if !url.contains("://") => base.join(url).map_err(parse_error),
            None if !url.contains("://") => Err(HttpError::invalid_uri(
                url,
                InvalidUriKind::MissingBase,
                "relative URL without a base URL",
            )),
            _ => Url::parse(url).map_err(parse_error),
        }
    }

    /// Create and send a request.
    ///
    /// # Errors
    /// Same as [`Client::create_request`] and [`Client::send`].
    pub async fn request(
        &self,
        method: Method,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        let request = self.create_request(method, url, options)?;
        self.send(request).await
    }

    /// Send a GET request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn get(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::GET, url, options).await
    }

    /// Send a HEAD request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn head(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::HEAD, url, options).await
    }

    /// Send a DELETE request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn delete(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::DELETE, url, options).await
    }

    /// Send an OPTIONS request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn options(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::OPTIONS, url, options).await
    }

    /// Send a POST request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn post(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::POST, url, options).await
    }

    /// Send a PUT request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn put(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::PUT, url, options).await
    }

    /// Send a PATCH request.
    ///
    /// # Errors
    /// Same as [`Client::request`].
    pub async fn patch(
        &self,
        url: impl Into<UrlTemplate>,
        options: RequestOptions,
    ) -> Result<Outcome, HttpError> {
        self.request(Method::PATCH, url, options).await
    }

    /// Drive one request through the pipeline.
    ///
    /// # Errors
    /// When the request's `exceptions` option is set, a failed request is
    /// returned as [`HttpError::Request`]; otherwise it comes back as
    /// `Ok(Outcome::Failure)`.
    pub async fn send(&self, request: Request) -> Result<Outcome, HttpError> {
        let mut settled = self.settle(Step::Before(request), Progress::default()).await;
        loop {
            match settled {
                Settled::Finished(request, outcome) => return raise_if_configured(&request, outcome),
                Settled::Transfer(request, progress) => {
                    let result = adapter::transfer(self.inner.adapter.as_ref(), &request).await;
                    settled = self.settle(Step::transferred(request, result), progress).await;
                }
            }
        }
    }

    /// Send a batch through the parallel adapter.
    ///
    /// Every request's `before` runs first; requests that were not
    /// intercepted are handed to the parallel adapter together, and
    /// `complete`/`error` fire for each as soon as its transfer finishes.
    /// Requests retried by a subscriber go out in a follow-up batch.
    ///
    /// Never fails: every outcome, including failures, is recorded in the
    /// returned [`Transaction`]. A request passed twice is sent once.
    pub async fn send_all(&self, requests: Vec<Request>) -> Transaction {
        let limit = self.inner.max_concurrency;
        let mut transaction = Transaction::new();

        let mut seen = HashSet::new();
        let mut round: Vec<(Step, Progress)> = Vec::with_capacity(requests.len());
        for request in requests {
            if seen.insert(request.id()) {
                round.push((Step::Before(request), Progress::default()));
            } else {
                tracing::warn!(request_id = %request.id(), "request passed twice to send_all; sending once");
            }
        }

        while !round.is_empty() {
            let settled: Vec<Settled> = stream::iter(round)
                .map(|(step, progress)| self.settle(step, progress))
                .buffer_unordered(limit)
                .collect()
                .await;

            let mut in_flight: HashMap<RequestId, (Request, Progress)> = HashMap::new();
            let mut transfers = Vec::new();
            for item in settled {
                match item {
                    Settled::Finished(request, outcome) => record(&mut transaction, request, outcome),
                    Settled::Transfer(request, progress) => {
                        in_flight.insert(request.id(), (request.clone(), progress));
                        transfers.push(request);
                    }
                }
            }
            if transfers.is_empty() {
                break;
            }
            tracing::debug!(batch = transfers.len(), "sending batch");

            let settled: Vec<Settled> = self
                .inner
                .parallel_adapter
                .send_all(transfers)
                .map(|(request, result)| {
                    let progress = in_flight
                        .remove(&request.id())
                        .map(|(_, progress)| progress)
                        .unwrap_or_default();
                    self.settle(Step::transferred(request, result), progress)
                })
                .buffer_unordered(limit)
                .collect()
                .await;

            round = Vec::new();
            for item in settled {
                match item {
                    Settled::Finished(request, outcome) => record(&mut transaction, request, outcome),
                    Settled::Transfer(request, progress) => round.push((Step::Transfer(request), progress)),
                }
            }

            // Requests the parallel adapter never reported back.
            for (_, (request, progress)) in in_flight {
                tracing::error!(request_id = %request.id(), "parallel adapter dropped request");
                let cause = HttpError::NoResponse("parallel adapter yielded no result".to_owned());
                round.push((
                    Step::Error {
                        request,
                        kind: FailureKind::Transport,
                        cause,
                        response: None,
                    },
                    progress,
                ));
            }
        }

        transaction
    }

    /// Run event phases until the request needs the transport or is finished,
    /// emitting `end` in the latter case.
    async fn settle(&self, step: Step, mut progress: Progress) -> Settled {
        match self.drive(step, &mut progress).await {
            Halt::Transfer(request) => Settled::Transfer(request, progress),
            Halt::Done(request, outcome) => {
                let mut event = EndEvent::new(request, outcome);
                self.inner.emitter.emit_end(&mut event).await;
                let (request, outcome) = event.into_parts();
                Settled::Finished(request, outcome)
            }
        }
    }

    async fn drive(&self, mut step: Step, progress: &mut Progress) -> Halt {
        loop {
            progress.steps += 1;
            if progress.steps > MAX_STEPS {
                step = Step::failed(
                    step.into_request(),
                    FailureKind::RequestFailed,
                    HttpError::TooManyAttempts(progress.attempts),
                    None,
                );
                progress.steps = 0;
            }

            step = match step {
                Step::Before(request) => {
                    progress.attempts += 1;
                    if progress.attempts > MAX_ATTEMPTS {
                        tracing::warn!(request_id = %request.id(), attempts = progress.attempts, "attempt limit reached");
                        Step::failed(
                            request,
                            FailureKind::RequestFailed,
                            HttpError::TooManyAttempts(MAX_ATTEMPTS),
                            None,
                        )
                    } else {
                        self.before(request).await
                    }
                }
                Step::Complete(request, response) => self.complete(request, response).await,
                Step::Error {
                    request,
                    kind,
                    cause,
                    response,
                } => self.error(request, kind, cause, response).await,
                Step::Transfer(request) => return Halt::Transfer(request),
                Step::Done(request, outcome) => return Halt::Done(request, outcome),
            };
        }
    }

    async fn before(&self, request: Request) -> Step {
        let mut event = BeforeEvent::new(request);
        let result = self.inner.emitter.emit_before(&mut event).await;
        let (request, action) = event.into_parts();

        if let Err(e) = result {
            tracing::debug!(request_id = %request.id(), error = %e, "before subscriber failed");
            return Step::Error {
                request,
                kind: FailureKind::RequestFailed,
                cause: HttpError::Subscriber(e),
                response: None,
            };
        }

        match action {
            None => Step::Transfer(request),
            Some(BeforeAction::Intercept(response)) => {
                tracing::debug!(request_id = %request.id(), status = response.status_code(), "intercepted before transfer");
                Step::Complete(request, response)
            }
            Some(BeforeAction::Fail(cause)) => Step::Error {
                request,
                kind: FailureKind::Intercepted,
                cause,
                response: None,
            },
            Some(BeforeAction::Cancel(cause)) => {
                tracing::debug!(request_id = %request.id(), "cancelled before transfer");
                Step::failed(request, FailureKind::RequestFailed, cause, None)
            }
        }
    }

    async fn complete(&self, request: Request, mut response: Response) -> Step {
        response.set_effective_url(request.url());

        let mut event = CompleteEvent::new(request, response);
        let result = self.inner.emitter.emit_complete(&mut event).await;
        let (request, response, retry, cancelled) = event.into_parts();

        if let Err(e) = result {
            tracing::debug!(request_id = %request.id(), error = %e, "complete subscriber failed");
            return Step::Error {
                request,
                kind: FailureKind::RequestFailed,
                cause: HttpError::Subscriber(e),
                response: Some(response),
            };
        }
        if let Some(cause) = cancelled {
            return Step::failed(request, FailureKind::RequestFailed, cause, Some(response));
        }
        if retry {
            tracing::debug!(request_id = %request.id(), "request re-entering pipeline after complete");
            return Step::Before(request);
        }
        Step::Done(request, Outcome::Response(response))
    }

    async fn error(
        &self,
        request: Request,
        kind: FailureKind,
        cause: HttpError,
        response: Option<Response>,
    ) -> Step {
        let mut event = ErrorEvent::new(request, kind, cause, response);
        let result = self.inner.emitter.emit_error(&mut event).await;

        if let Err(e) = result {
            let (request, response) = event.into_abandoned();
            tracing::debug!(request_id = %request.id(), error = %e, "error subscriber failed");
            return Step::failed(
                request,
                FailureKind::RequestFailed,
                HttpError::Subscriber(e),
                response,
            );
        }

        match event.into_resolution() {
            ErrorResolution::Retry(request) => {
                tracing::debug!(request_id = %request.id(), "request re-entering pipeline after error");
                Step::Before(request)
            }
            ErrorResolution::Recovered(request, response) => Step::Complete(request, response),
            ErrorResolution::Failed {
                request,
                kind,
                cause,
                response,
            } => Step::failed(request, kind, cause, response),
        }
    }
}

fn raise_if_configured(request: &Request, outcome: Outcome) -> Result<Outcome, HttpError> {
    match outcome {
        Outcome::Failure(failure) if request.config().exceptions => {
            Err(HttpError::Request(Box::new(failure)))
        }
        outcome => Ok(outcome),
    }
}

fn record(transaction: &mut Transaction, request: Request, outcome: Outcome) {
    if let Err(e) = transaction.put(request, outcome) {
        tracing::error!(error = %e, "outcome already recorded; dropping");
    }
}
