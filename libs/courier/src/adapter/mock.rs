use super::{Adapter, TransferResult};
use crate::error::HttpError;
use crate::message::{Request, Response};
use crate::outcome::TransferError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

type Generator = dyn Fn(&Request) -> TransferResult + Send + Sync;

enum Source {
    Queue(Mutex<VecDeque<TransferResult>>),
    Generator(Box<Generator>),
}

/// In-process adapter answering from a FIFO queue or a generator function.
///
/// Every request it receives is recorded for later inspection. An empty
/// queue answers with [`HttpError::NoResponse`].
pub struct MockAdapter {
    source: Source,
    delay: Option<Duration>,
    received: Mutex<Vec<Request>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Adapter with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: Source::Queue(Mutex::new(VecDeque::new())),
            delay: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Adapter computing each result from the request.
    #[must_use]
    pub fn from_fn<F>(generator: F) -> Self
    where
        F: Fn(&Request) -> TransferResult + Send + Sync + 'static,
    {
        Self {
            source: Source::Generator(Box::new(generator)),
            delay: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response.
    #[must_use]
    pub fn with_response(self, response: Response) -> Self {
        self.push(Ok(response));
        self
    }

    /// Queue several responses.
    #[must_use]
    pub fn with_responses(self, responses: impl IntoIterator<Item = Response>) -> Self {
        for response in responses {
            self.push(Ok(response));
        }
        self
    }

    /// Queue a transport failure.
    #[must_use]
    pub fn with_error(self, cause: HttpError) -> Self {
        self.push(Err(TransferError::from(cause)));
        self
    }

    /// Wait this long before answering each request.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a result. Ignored by generator-backed adapters.
    pub fn push(&self, result: TransferResult) {
        if let Source::Queue(queue) = &self.source {
            queue.lock().push_back(result);
        }
    }

    /// Number of queued results not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        match &self.source {
            Source::Queue(queue) => queue.lock().len(),
            Source::Generator(_) => 0,
        }
    }

    /// Requests received so far, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<Request> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn send(&self, request: &Request) -> TransferResult {
        self.received.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.source {
            Source::Queue(queue) => queue.lock().pop_front().unwrap_or_else(|| {
                Err(HttpError::NoResponse("mock adapter queue is empty".to_owned()).into())
            }),
            Source::Generator(generator) => generator(request),
        }
    }
}
