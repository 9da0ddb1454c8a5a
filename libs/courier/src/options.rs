//! Per-call options for [`Client::create_request`](crate::Client::create_request).

use crate::error::HttpError;
use crate::headers::{HeaderCollection, HeaderValues};
use crate::message::{Auth, Request, Verify};
use crate::query::{Query, QueryValue};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Request body and the content type it implies.
#[derive(Debug, Clone, Default)]
enum BodyKind {
    #[default]
    Empty,
    Bytes(Bytes),
    Json(Bytes),
    Form(Bytes),
}

/// Auth override relative to the client defaults.
#[derive(Debug, Clone, Default)]
enum AuthOverride {
    #[default]
    Inherit,
    Disabled,
    Set(Auth),
}

/// Options merged over the client's [`RequestDefaults`](crate::RequestDefaults).
///
/// Unset options inherit the defaults; headers and query parameters merge
/// key by key with per-call values winning.
///
/// Invalid header input is remembered and reported when the request is
/// created, so options can be chained without intermediate `?`.
///
/// ```
/// use courier::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .header("x-request-id", "abc123")
///     .query("page", "2")
///     .timeout(Duration::from_secs(5))
///     .json(&serde_json::json!({"name": "Alice"}))
///     .unwrap();
/// # let _ = options;
/// ```
#[derive(Debug, Default)]
#[must_use]
pub struct RequestOptions {
    headers: HeaderCollection,
    query: Query,
    body: BodyKind,
    allow_redirects: Option<bool>,
    exceptions: Option<bool>,
    verify: Option<Verify>,
    auth: AuthOverride,
    timeout: Option<Duration>,
    extensions: BTreeMap<String, serde_json::Value>,
    /// Error captured while building (reported by `apply`)
    error: Option<HttpError>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any default value for it.
    pub fn header(mut self, name: &str, values: impl Into<HeaderValues>) -> Self {
        if self.error.is_none()
            && let Err(e) = self.headers.set(name, values)
        {
            self.error = Some(e);
        }
        self
    }

    /// Set every header from `headers`.
    pub fn headers(mut self, headers: &HeaderCollection) -> Self {
        self.headers.set_all(headers);
        self
    }

    /// Set a query parameter, replacing any default value for it.
    pub fn query(mut self, key: &str, value: impl Into<QueryValue>) -> Self {
        self.query.set(key, value);
        self
    }

    /// Merge every parameter of `query`.
    pub fn query_params(mut self, query: &Query) -> Self {
        self.query.merge(query);
        self
    }

    /// Raw body. No content type is implied.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyKind::Bytes(body.into());
        self
    }

    /// JSON body; sets `Content-Type: application/json` unless a content type was given.
    ///
    /// # Errors
    /// Returns [`HttpError::Json`] if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        self.body = BodyKind::Json(Bytes::from(serde_json::to_vec(value)?));
        Ok(self)
    }

    /// Form body; sets `Content-Type: application/x-www-form-urlencoded`
    /// unless a content type was given.
    ///
    /// # Errors
    /// Returns [`HttpError::FormEncode`] if `fields` cannot be form-encoded.
    pub fn form<T: Serialize + ?Sized>(mut self, fields: &T) -> Result<Self, HttpError> {
        self.body = BodyKind::Form(Bytes::from(serde_urlencoded::to_string(fields)?));
        Ok(self)
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = Some(allow);
        self
    }

    /// Whether `send` returns failures as `Err` (true) or as `Ok(Outcome::Failure)`.
    pub fn exceptions(mut self, exceptions: bool) -> Self {
        self.exceptions = Some(exceptions);
        self
    }

    pub fn verify(mut self, verify: impl Into<Verify>) -> Self {
        self.verify = Some(verify.into());
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = AuthOverride::Set(auth);
        self
    }

    /// Send without credentials even if the client has default auth.
    pub fn no_auth(mut self) -> Self {
        self.auth = AuthOverride::Disabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Free-form configuration value for subscribers.
    pub fn config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Apply these options to a request that already carries the client defaults.
    pub(crate) fn apply(self, request: &mut Request) -> Result<(), HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        request.headers_mut().set_all(&self.headers);
        request.query_mut().merge(&self.query);

        let content_type = match self.body {
            BodyKind::Empty => None,
            BodyKind::Bytes(body) => {
                request.set_body(Some(body));
                None
            }
            BodyKind::Json(body) => {
                request.set_body(Some(body));
                Some("application/json")
            }
            BodyKind::Form(body) => {
                request.set_body(Some(body));
                Some("application/x-www-form-urlencoded")
            }
        };
        if let Some(content_type) = content_type
            && !request.headers().has("Content-Type")
        {
            request.set_header("Content-Type", content_type)?;
        }

        let config = request.config_mut();
        if let Some(allow) = self.allow_redirects {
            config.allow_redirects = allow;
        }
        if let Some(exceptions) = self.exceptions {
            config.exceptions = exceptions;
        }
        if let Some(verify) = self.verify {
            config.verify = verify;
        }
        match self.auth {
            AuthOverride::Inherit => {}
            AuthOverride::Disabled => config.auth = None,
            AuthOverride::Set(auth) => config.auth = Some(auth),
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        for (key, value) in self.extensions {
            config.set(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::Method;

    fn request() -> Request {
        let mut request = Request::new(Method::GET, "http://example.com/?a=1&b=2").unwrap();
        request.set_header("Accept", "text/html").unwrap();
        request.set_header("X-Default", "yes").unwrap();
        request.config_mut().auth = Some(Auth::bearer("default"));
        request
    }

    #[test]
    fn test_per_call_values_win_key_by_key() {
        let mut request = request();
        RequestOptions::new()
            .header("accept", "application/json")
            .query("b", "3")
            .query("c", "4")
            .apply(&mut request)
            .unwrap();

        assert_eq!(request.headers().first("Accept"), Some("application/json"));
        assert_eq!(request.headers().first("X-Default"), Some("yes"));
        assert_eq!(request.url(), "http://example.com/?a=1&b=3&c=4");
    }

    #[test]
    fn test_json_sets_content_type() {
        let mut request = request();
        RequestOptions::new()
            .json(&serde_json::json!({"k": "v"}))
            .unwrap()
            .apply(&mut request)
            .unwrap();

        assert_eq!(request.body().map(|b| &b[..]), Some(&b"{\"k\":\"v\"}"[..]));
        assert_eq!(request.headers().first("content-type"), Some("application/json"));
    }

    #[test]
    fn test_explicit_content_type_kept_for_form() {
        let mut request = request();
        RequestOptions::new()
            .header("Content-Type", "text/plain")
            .form(&[("a", "b c")])
            .unwrap()
            .apply(&mut request)
            .unwrap();

        assert_eq!(request.body().map(|b| &b[..]), Some(&b"a=b+c"[..]));
        assert_eq!(request.headers().first("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_no_auth_clears_default() {
        let mut request = request();
        RequestOptions::new().no_auth().apply(&mut request).unwrap();
        assert!(request.config().auth.is_none());
    }

    #[test]
    fn test_config_values() {
        let mut request = request();
        RequestOptions::new()
            .allow_redirects(false)
            .exceptions(false)
            .verify(false)
            .timeout(Duration::from_secs(2))
            .config("cache", serde_json::json!(false))
            .apply(&mut request)
            .unwrap();

        let config = request.config();
        assert!(!config.allow_redirects);
        assert!(!config.exceptions);
        assert_eq!(config.verify, Verify::Disabled);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.get("cache"), Some(&serde_json::json!(false)));
    }

    #[test]
    fn test_invalid_header_is_deferred() {
        let options = RequestOptions::new()
            .header("bad header", "x")
            .header("X-Ok", "y");
        let mut request = request();
        let err = options.apply(&mut request).unwrap_err();
        assert!(err.is_invalid_input());
        assert!(!request.headers().has("X-Ok"));
    }
}
