use crate::error::{BoxError, HttpError};
use crate::message::{Request, Response};
use crate::outcome::{FailureKind, Outcome};

/// What a `before` subscriber decided instead of sending the request.
#[derive(Debug)]
pub enum BeforeAction {
    /// Skip the transport and complete with this response
    Intercept(Response),
    /// Skip the transport and fail through the `error` phase
    Fail(HttpError),
    /// End the request without dispatching `error`
    Cancel(HttpError),
}

/// Emitted before a request is handed to the transport.
#[derive(Debug)]
pub struct BeforeEvent {
    request: Request,
    action: Option<BeforeAction>,
    propagation_stopped: bool,
}

impl BeforeEvent {
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            request,
            action: None,
            propagation_stopped: false,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Complete the request with `response` without touching the transport.
    pub fn intercept(&mut self, response: Response) {
        self.action = Some(BeforeAction::Intercept(response));
    }

    /// Fail the request deliberately; the failure goes through the `error` phase.
    pub fn intercept_failure(&mut self, cause: HttpError) {
        self.action = Some(BeforeAction::Fail(cause));
    }

    /// Abort the request. It ends as a failure and no `error` event is emitted.
    pub fn cancel(&mut self, reason: impl Into<BoxError>) {
        self.action = Some(BeforeAction::Cancel(HttpError::Cancelled(reason.into())));
    }

    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        matches!(
            self.action,
            Some(BeforeAction::Intercept(_) | BeforeAction::Fail(_))
        )
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.action, Some(BeforeAction::Cancel(_)))
    }

    /// Response supplied by an earlier subscriber, if any.
    #[must_use]
    pub fn intercepted_response(&self) -> Option<&Response> {
        match &self.action {
            Some(BeforeAction::Intercept(response)) => Some(response),
            _ => None,
        }
    }

    /// Skip the remaining `before` subscribers for this event.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    #[must_use]
    pub fn into_parts(self) -> (Request, Option<BeforeAction>) {
        (self.request, self.action)
    }
}

/// Emitted when a response is available for a request.
#[derive(Debug)]
pub struct CompleteEvent {
    request: Request,
    response: Response,
    intercepted: bool,
    retry: bool,
    cancelled: Option<HttpError>,
    propagation_stopped: bool,
}

impl CompleteEvent {
    #[must_use]
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            intercepted: false,
            retry: false,
            cancelled: None,
            propagation_stopped: false,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Replace the response seen by later subscribers and the caller.
    pub fn intercept(&mut self, response: Response) {
        self.response = response;
        self.intercepted = true;
    }

    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    /// Send the (possibly modified) request again, starting from `before`.
    pub fn retry(&mut self) {
        self.retry = true;
    }

    #[must_use]
    pub fn is_retrying(&self) -> bool {
        self.retry
    }

    /// Abort the request; it ends as a failure carrying `reason`.
    pub fn cancel(&mut self, reason: impl Into<BoxError>) {
        self.cancelled = Some(HttpError::Cancelled(reason.into()));
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub(crate) fn into_parts(self) -> (Request, Response, bool, Option<HttpError>) {
        (self.request, self.response, self.retry, self.cancelled)
    }
}

/// Emitted when a request failed: transport error, deliberate failure or subscriber error.
#[derive(Debug)]
pub struct ErrorEvent {
    request: Request,
    kind: FailureKind,
    cause: HttpError,
    response: Option<Response>,
    recovered: Option<Response>,
    retry: bool,
    propagation_stopped: bool,
}

impl ErrorEvent {
    #[must_use]
    pub fn new(
        request: Request,
        kind: FailureKind,
        cause: HttpError,
        response: Option<Response>,
    ) -> Self {
        Self {
            request,
            kind,
            cause,
            response,
            recovered: None,
            retry: false,
            propagation_stopped: false,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn cause(&self) -> &HttpError {
        &self.cause
    }

    /// Response received before the failure, if any.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Recover from the failure with `response`; the request then completes normally.
    pub fn intercept(&mut self, response: Response) {
        self.recovered = Some(response);
    }

    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        self.recovered.is_some()
    }

    /// Send the (possibly modified) request again, starting from `before`.
    pub fn retry(&mut self) {
        self.retry = true;
    }

    #[must_use]
    pub fn is_retrying(&self) -> bool {
        self.retry
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Request and partial response, dropping any recovery or retry decision.
    pub(crate) fn into_abandoned(self) -> (Request, Option<Response>) {
        (self.request, self.response)
    }

    pub(crate) fn into_resolution(self) -> ErrorResolution {
        if self.retry {
            ErrorResolution::Retry(self.request)
        } else if let Some(response) = self.recovered {
            ErrorResolution::Recovered(self.request, response)
        } else {
            ErrorResolution::Failed {
                request: self.request,
                kind: self.kind,
                cause: self.cause,
                response: self.response,
            }
        }
    }
}

/// How the `error` phase ended.
pub enum ErrorResolution {
    Retry(Request),
    Recovered(Request, Response),
    Failed {
        request: Request,
        kind: FailureKind,
        cause: HttpError,
        response: Option<Response>,
    },
}

/// Emitted once per request after its outcome is final.
#[derive(Debug)]
pub struct EndEvent {
    request: Request,
    outcome: Outcome,
    propagation_stopped: bool,
}

impl EndEvent {
    #[must_use]
    pub fn new(request: Request, outcome: Outcome) -> Self {
        Self {
            request,
            outcome,
            propagation_stopped: false,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[must_use]
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub(crate) fn into_parts(self) -> (Request, Outcome) {
        (self.request, self.outcome)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};

    fn request() -> Request {
        Request::new(Method::GET, "http://example.com").unwrap()
    }

    #[test]
    fn test_before_intercept_then_cancel_last_wins() {
        let mut event = BeforeEvent::new(request());
        event.intercept(Response::new(StatusCode::OK));
        assert!(event.is_intercepted());
        assert_eq!(
            event.intercepted_response().map(Response::status),
            Some(StatusCode::OK)
        );

        event.cancel("changed my mind");
        assert!(event.is_cancelled());
        assert!(!event.is_intercepted());
        assert!(matches!(
            event.into_parts().1,
            Some(BeforeAction::Cancel(HttpError::Cancelled(_)))
        ));
    }

    #[test]
    fn test_complete_intercept_replaces_response() {
        let mut event = CompleteEvent::new(request(), Response::new(StatusCode::NOT_FOUND));
        event.intercept(Response::new(StatusCode::OK));
        assert!(event.is_intercepted());
        assert_eq!(event.response().status(), StatusCode::OK);
        assert!(!event.is_retrying());
    }

    #[test]
    fn test_error_resolution_prefers_retry() {
        let mut event = ErrorEvent::new(
            request(),
            FailureKind::Transport,
            HttpError::NoResponse("x".to_owned()),
            None,
        );
        event.intercept(Response::new(StatusCode::OK));
        event.retry();
        assert!(matches!(event.into_resolution(), ErrorResolution::Retry(_)));
    }

    #[test]
    fn test_error_resolution_recovered_and_failed() {
        let mut event = ErrorEvent::new(
            request(),
            FailureKind::Transport,
            HttpError::NoResponse("x".to_owned()),
            None,
        );
        event.intercept(Response::new(StatusCode::ACCEPTED));
        assert!(matches!(
            event.into_resolution(),
            ErrorResolution::Recovered(_, r) if r.status() == StatusCode::ACCEPTED
        ));

        let event = ErrorEvent::new(
            request(),
            FailureKind::Intercepted,
            HttpError::NoResponse("x".to_owned()),
            None,
        );
        assert!(matches!(
            event.into_resolution(),
            ErrorResolution::Failed {
                kind: FailureKind::Intercepted,
                ..
            }
        ));
    }
}
