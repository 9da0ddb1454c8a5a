//! Terminal results of the request pipeline.

use crate::error::HttpError;
use crate::message::{Request, Response};
use std::fmt;

/// Why a request ended without a usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailureKind {
    /// Connection, TLS or timeout failure reported by the adapter
    Transport,
    /// A subscriber deliberately produced the failure
    Intercepted,
    /// A subscriber errored (and nothing recovered) or cancelled the request
    RequestFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Transport => "transport",
            FailureKind::Intercepted => "intercepted",
            FailureKind::RequestFailed => "request",
        })
    }
}

/// A request that ended in failure, with whatever response was received.
#[derive(Debug, thiserror::Error)]
#[error("{kind} failure for {} {}: {cause}", .request.method(), .request.url())]
pub struct Failure {
    kind: FailureKind,
    request: Request,
    #[source]
    cause: HttpError,
    response: Option<Response>,
}

impl Failure {
    #[must_use]
    pub fn new(
        kind: FailureKind,
        request: Request,
        cause: HttpError,
        response: Option<Response>,
    ) -> Self {
        Self {
            kind,
            request,
            cause,
            response,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[must_use]
    pub fn cause(&self) -> &HttpError {
        &self.cause
    }

    /// Partial or error response received before the failure, if any.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    #[must_use]
    pub fn into_parts(self) -> (Request, HttpError, Option<Response>) {
        (self.request, self.cause, self.response)
    }
}

/// Error returned by an adapter for a single transfer.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct TransferError {
    #[source]
    pub cause: HttpError,
    /// Response received before the transfer broke (e.g. headers without a full body)
    pub response: Option<Response>,
}

impl TransferError {
    #[must_use]
    pub fn with_response(cause: HttpError, response: Response) -> Self {
        Self {
            cause,
            response: Some(response),
        }
    }
}

impl From<HttpError> for TransferError {
    fn from(cause: HttpError) -> Self {
        Self {
            cause,
            response: None,
        }
    }
}

/// Result of one request: exactly one per request in a transaction.
#[derive(Debug)]
pub enum Outcome {
    Response(Response),
    Failure(Failure),
}

impl Outcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Response(response) => Some(response),
            Outcome::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(failure) => Some(failure),
            Outcome::Response(_) => None,
        }
    }

    /// Convert into a `Result`, boxing the failure as [`HttpError::Request`].
    ///
    /// # Errors
    /// Returns the failure when the outcome is not a response.
    pub fn into_result(self) -> Result<Response, HttpError> {
        match self {
            Outcome::Response(response) => Ok(response),
            Outcome::Failure(failure) => Err(HttpError::Request(Box::new(failure))),
        }
    }
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Outcome::Response(response)
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::error::Error;

    #[test]
    fn test_failure_display_and_source() {
        let request = Request::new(Method::GET, "http://example.com/x").unwrap();
        let failure = Failure::new(
            FailureKind::Transport,
            request,
            HttpError::NoResponse("queue empty".to_owned()),
            None,
        );

        assert_eq!(
            failure.to_string(),
            "transport failure for GET http://example.com/x: No response available: queue empty"
        );
        assert!(failure.source().is_some());
        assert_eq!(failure.kind(), FailureKind::Transport);
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = Outcome::from(Response::new(StatusCode::OK));
        assert_eq!(ok.into_result().unwrap().status(), StatusCode::OK);

        let request = Request::new(Method::GET, "http://example.com").unwrap();
        let failure = Failure::new(
            FailureKind::Intercepted,
            request,
            HttpError::InvalidInput("no".to_owned()),
            Some(Response::new(StatusCode::BAD_GATEWAY)),
        );
        let outcome = Outcome::from(failure);
        assert!(outcome.is_failure());
        assert_eq!(
            outcome.failure().and_then(Failure::response).map(Response::status),
            Some(StatusCode::BAD_GATEWAY)
        );

        let err = outcome.into_result().unwrap_err();
        assert_eq!(
            err.failure().map(Failure::kind),
            Some(FailureKind::Intercepted)
        );
    }

    #[test]
    fn test_transfer_error_from_cause() {
        let err = TransferError::from(HttpError::Timeout(std::time::Duration::from_secs(2)));
        assert!(err.response.is_none());
        assert!(err.cause.is_transport());
        assert_eq!(err.to_string(), "Request timed out after 2s");
    }
}
