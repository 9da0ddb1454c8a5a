use crate::message::RequestId;
use crate::outcome::Failure;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type accepted from subscribers and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is relative and there is no base URL to resolve it against
    MissingBase,
    /// URL template could not be expanded
    Template,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Malformed header, query, option or configuration value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse or resolve)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Single transfer timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// JSON serialization or parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// An adapter had nothing to answer with (e.g. an exhausted mock queue)
    #[error("No response available: {0}")]
    NoResponse(String),

    /// A subscriber returned an error while handling an event
    #[error("Subscriber failed: {0}")]
    Subscriber(#[source] BoxError),

    /// A subscriber cancelled the request
    #[error("Request cancelled: {0}")]
    Cancelled(#[source] BoxError),

    /// Subscribers asked for more transfer attempts than the pipeline allows
    #[error("Request exceeded {0} transfer attempts")]
    TooManyAttempts(usize),

    /// A transaction already holds an outcome for this request
    #[error("Outcome already recorded for request {0}")]
    DuplicateOutcome(RequestId),

    /// A request ended in a failure and the request was configured to raise it
    #[error(transparent)]
    Request(Box<Failure>),
}

impl HttpError {
    /// Whether this error reports malformed caller input rather than a runtime failure.
    ///
    /// Invalid input fails immediately and is never retried.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            HttpError::InvalidInput(_)
                | HttpError::RequestBuild(_)
                | HttpError::InvalidHeaderName(_)
                | HttpError::InvalidHeaderValue(_)
                | HttpError::InvalidUri { .. }
                | HttpError::FormEncode(_)
        )
    }

    /// Whether this error came from the network layer (connection, TLS or timeout).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HttpError::Transport(_) | HttpError::Tls(_) | HttpError::Timeout(_)
        )
    }

    /// The failure carried by [`HttpError::Request`], if any.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            HttpError::Request(failure) => Some(failure),
            _ => None,
        }
    }

    pub(crate) fn invalid_uri(url: &str, kind: InvalidUriKind, reason: impl ToString) -> Self {
        HttpError::InvalidUri {
            url: url.to_owned(),
            kind,
            reason: reason.to_string(),
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().expect("transport error should have a source");
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.map(|e| e.0), Some("connection refused"));
        assert!(err.is_transport());
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn test_subscriber_error_preserves_source() {
        let err = HttpError::Subscriber(Box::new(TestError("listener blew up")));

        let source = err.source().unwrap();
        assert!(source.downcast_ref::<TestError>().is_some());
        assert!(!err.is_transport());
    }

    #[test]
    fn test_invalid_input_classification() {
        assert!(HttpError::InvalidInput("bad".to_owned()).is_invalid_input());
        assert!(
            HttpError::invalid_uri("::", InvalidUriKind::ParseError, "nope").is_invalid_input()
        );
        assert!(!HttpError::Timeout(Duration::from_secs(1)).is_invalid_input());
        assert!(HttpError::Timeout(Duration::from_secs(1)).is_transport());
    }

    #[test]
    fn test_error_chain_traversal() {
        let err = HttpError::Tls(Box::new(TestError("certificate expired")));

        let mut count = 0;
        let mut current: Option<&(dyn Error + 'static)> = Some(&err);
        while let Some(e) = current {
            count += 1;
            current = e.source();
        }

        assert_eq!(count, 2, "chain should hold HttpError and TestError");
    }
}
