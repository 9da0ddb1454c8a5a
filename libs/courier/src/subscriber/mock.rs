use crate::error::{BoxError, HttpError};
use crate::event::{BeforeEvent, EventName, Subscriber};
use crate::factory::{DefaultMessageFactory, Message, MessageFactory};
use crate::message::Response;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A canned result served by [`MockSubscriber`].
#[derive(Debug)]
pub enum MockEntry {
    Response(Response),
    /// Fails the request through the `error` phase as an intercepted failure
    Failure(HttpError),
}

/// Answers requests from a FIFO queue at `before`, so the adapter is never called.
///
/// Runs after every other `before` subscriber, which therefore still see and
/// may modify the request. An empty queue fails the request.
#[derive(Debug, Default)]
pub struct MockSubscriber {
    queue: Mutex<VecDeque<MockEntry>>,
}

impl MockSubscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_responses(responses: impl IntoIterator<Item = Response>) -> Self {
        let mock = Self::new();
        for response in responses {
            mock.add_response(response);
        }
        mock
    }

    pub fn add_response(&self, response: Response) {
        self.queue.lock().push_back(MockEntry::Response(response));
    }

    pub fn add_failure(&self, cause: HttpError) {
        self.queue.lock().push_back(MockEntry::Failure(cause));
    }

    /// Queue a response given as a raw HTTP/1.x message.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidInput`] if `raw` is not a valid response message.
    pub fn add_raw(&self, raw: &[u8]) -> Result<(), HttpError> {
        match DefaultMessageFactory.from_message(raw)? {
            Message::Response(response) => {
                self.add_response(response);
                Ok(())
            }
            Message::Request(_) => Err(HttpError::InvalidInput(
                "expected a response message, got a request".to_owned(),
            )),
        }
    }

    /// Number of queued entries not yet served.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl Subscriber for MockSubscriber {
    fn events(&self) -> Vec<(EventName, i32)> {
        vec![(EventName::Before, i32::MIN)]
    }

    async fn on_before(&self, event: &mut BeforeEvent) -> Result<(), BoxError> {
        let entry = self.queue.lock().pop_front();
        match entry {
            Some(MockEntry::Response(response)) => event.intercept(response),
            Some(MockEntry::Failure(cause)) => event.intercept_failure(cause),
            None => return Err("mock queue is empty".into()),
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::event::BeforeAction;
    use crate::message::Request;
    use http::{Method, StatusCode};

    fn before() -> BeforeEvent {
        BeforeEvent::new(Request::new(Method::GET, "http://example.com").unwrap())
    }

    #[tokio::test]
    async fn test_serves_in_order_then_errors() {
        let mock = MockSubscriber::with_responses([
            Response::new(StatusCode::OK),
            Response::new(StatusCode::CREATED),
        ]);
        mock.add_failure(HttpError::NoResponse("down".to_owned()));

        let mut event = before();
        mock.on_before(&mut event).await.unwrap();
        assert_eq!(event.intercepted_response().map(Response::status), Some(StatusCode::OK));

        let mut event = before();
        mock.on_before(&mut event).await.unwrap();
        assert_eq!(
            event.intercepted_response().map(Response::status),
            Some(StatusCode::CREATED)
        );

        let mut event = before();
        mock.on_before(&mut event).await.unwrap();
        assert!(matches!(event.into_parts().1, Some(BeforeAction::Fail(_))));

        assert_eq!(mock.remaining(), 0);
        assert!(mock.on_before(&mut before()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_raw_message() {
        let mock = MockSubscriber::new();
        mock.add_raw(b"HTTP/1.1 202 Accepted\r\nX-Foo: bar\r\n\r\n").unwrap();
        assert!(mock.add_raw(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").is_err());

        let mut event = before();
        mock.on_before(&mut event).await.unwrap();
        let response = event.intercepted_response().unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().first("x-foo"), Some("bar"));
    }
}
