use crate::error::BoxError;
use crate::event::{EndEvent, EventName, PRIORITY_LATE, Subscriber};
use crate::message::{Request, Response};
use crate::outcome::{FailureKind, Outcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A finished request as recorded by [`HistorySubscriber`].
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub request: Request,
    /// Final response, or the partial response of a failure
    pub response: Option<Response>,
    /// Failure kind and message when the request failed
    pub failure: Option<(FailureKind, String)>,
}

impl HistoryEntry {
    fn from_outcome(request: &Request, outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Response(response) => Self {
                request: request.clone(),
                response: Some(response.clone()),
                failure: None,
            },
            Outcome::Failure(failure) => Self {
                request: request.clone(),
                response: failure.response().cloned(),
                failure: Some((failure.kind(), failure.cause().to_string())),
            },
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Keeps the last `limit` finished requests with their outcome.
///
/// Entries are recorded on `end`, oldest first.
#[derive(Debug)]
pub struct HistorySubscriber {
    limit: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl Default for HistorySubscriber {
    fn default() -> Self {
        Self::new(10)
    }
}

impl HistorySubscriber {
    /// History holding at most `limit` entries (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            entries: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<HistoryEntry> {
        self.entries.lock().back().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl Subscriber for HistorySubscriber {
    fn events(&self) -> Vec<(EventName, i32)> {
        vec![(EventName::End, PRIORITY_LATE)]
    }

    async fn on_end(&self, event: &mut EndEvent) -> Result<(), BoxError> {
        let entry = HistoryEntry::from_outcome(event.request(), event.outcome());
        let mut entries = self.entries.lock();
        if entries.len() == self.limit {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }
}
