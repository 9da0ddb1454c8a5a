//! Bookkeeping for a batch of requests and their outcomes.

use crate::error::HttpError;
use crate::message::{Request, RequestId, Response};
use crate::outcome::{Failure, Outcome};
use std::collections::HashMap;

/// Typed map from requests to their outcomes.
///
/// Each request identity may be stored once; iteration follows insertion order.
#[derive(Debug, Default)]
pub struct Transaction {
    entries: Vec<(Request, Outcome)>,
    index: HashMap<RequestId, usize>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for `request`.
    ///
    /// # Errors
    /// Returns [`HttpError::DuplicateOutcome`] if this request identity already has an outcome.
    pub fn put(&mut self, request: Request, outcome: Outcome) -> Result<(), HttpError> {
        let id = request.id();
        if self.index.contains_key(&id) {
            return Err(HttpError::DuplicateOutcome(id));
        }
        self.index.insert(id, self.entries.len());
        self.entries.push((request, outcome));
        Ok(())
    }

    /// Outcome stored for `request`'s identity.
    #[must_use]
    pub fn get(&self, request: &Request) -> Option<&Outcome> {
        self.get_by_id(request.id())
    }

    #[must_use]
    pub fn get_by_id(&self, id: RequestId) -> Option<&Outcome> {
        self.index.get(&id).map(|&idx| &self.entries[idx].1)
    }

    #[must_use]
    pub fn contains(&self, request: &Request) -> bool {
        self.index.contains_key(&request.id())
    }

    /// Every outcome in insertion order.
    pub fn results(&self) -> impl Iterator<Item = &Outcome> {
        self.entries.iter().map(|(_, outcome)| outcome)
    }

    /// Successful responses paired with their requests.
    pub fn responses(&self) -> impl Iterator<Item = (&Response, &Request)> {
        self.entries
            .iter()
            .filter_map(|(request, outcome)| outcome.response().map(|r| (r, request)))
    }

    /// Failures paired with their requests.
    pub fn failures(&self) -> impl Iterator<Item = (&Failure, &Request)> {
        self.entries
            .iter()
            .filter_map(|(request, outcome)| outcome.failure().map(|f| (f, request)))
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|(_, outcome)| outcome.is_failure())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Request, &Outcome)> {
        self.entries.iter().map(|(request, outcome)| (request, outcome))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Transaction {
    type Item = (Request, Outcome);
    type IntoIter = std::vec::IntoIter<(Request, Outcome)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
