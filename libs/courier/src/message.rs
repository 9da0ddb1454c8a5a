//! Request and response messages.

use crate::error::{HttpError, InvalidUriKind};
use crate::headers::{HeaderCollection, HeaderValues};
use crate::query::Query;
use base64::Engine;
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique request identity.
///
/// Assigned when a [`Request`] is constructed and shared by its clones, so a
/// request mutated by subscribers and retried keeps the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials attached to a request.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "AuthRepr")]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthRepr {
    Basic(String, String),
    Bearer { bearer: String },
}

impl From<AuthRepr> for Auth {
    fn from(repr: AuthRepr) -> Self {
        match repr {
            AuthRepr::Basic(username, password) => Auth::Basic { username, password },
            AuthRepr::Bearer { bearer } => Auth::Bearer(bearer),
        }
    }
}

impl Auth {
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Bearer(token.into())
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self {
            Auth::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                format!("Basic {encoded}")
            }
            Auth::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Auth::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// TLS peer verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "VerifyRepr")]
pub enum Verify {
    /// Verify against the bundled Mozilla roots
    #[default]
    Enabled,
    /// Verify against the OS certificate store
    Native,
    /// Verify against the PEM certificates in this file
    CaBundle(PathBuf),
    /// Accept any certificate
    Disabled,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VerifyRepr {
    Flag(bool),
    Path(String),
}

impl From<VerifyRepr> for Verify {
    fn from(repr: VerifyRepr) -> Self {
        match repr {
            VerifyRepr::Flag(true) => Verify::Enabled,
            VerifyRepr::Flag(false) => Verify::Disabled,
            VerifyRepr::Path(path) if path == "native" => Verify::Native,
            VerifyRepr::Path(path) => Verify::CaBundle(PathBuf::from(path)),
        }
    }
}

impl From<bool> for Verify {
    fn from(enabled: bool) -> Self {
        if enabled {
            Verify::Enabled
        } else {
            Verify::Disabled
        }
    }
}

/// Per-request configuration bag.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    /// Follow redirects (consumed by the redirect subscriber)
    pub allow_redirects: bool,
    /// Raise failures from `send` instead of returning them as outcomes
    pub exceptions: bool,
    pub verify: Verify,
    pub auth: Option<Auth>,
    /// Per-transfer timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    extensions: BTreeMap<String, serde_json::Value>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            allow_redirects: true,
            exceptions: true,
            verify: Verify::Enabled,
            auth: None,
            timeout: None,
            extensions: BTreeMap::new(),
        }
    }
}

impl RequestConfig {
    /// Free-form extension value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.extensions.remove(key)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.extensions.contains_key(key)
    }
}

/// An outgoing HTTP request.
///
/// The URL is stored without its query string; the query lives in a separate
/// [`Query`] so subscribers can edit parameters without reparsing.
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    method: Method,
    url: Url,
    query: Query,
    headers: HeaderCollection,
    body: Option<Bytes>,
    config: RequestConfig,
}

impl Request {
    /// Create a request for an absolute URL.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidUri`] if `url` is not an absolute URL.
    pub fn new(method: Method, url: &str) -> Result<Self, HttpError> {
        let parsed = Url::parse(url)
            .map_err(|e| HttpError::invalid_uri(url, InvalidUriKind::ParseError, e))?;
        Ok(Self::from_url(method, parsed))
    }

    /// Create a request from an already parsed URL.
    #[must_use]
    pub fn from_url(method: Method, url: Url) -> Self {
        let (url, query) = split_query(url);
        Self {
            id: RequestId::next(),
            method,
            url,
            query,
            headers: HeaderCollection::new(),
            body: None,
            config: RequestConfig::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Full URL including the serialized query.
    #[must_use]
    pub fn url(&self) -> String {
        if self.query.is_empty() {
            self.url.to_string()
        } else {
            format!("{}?{}", self.url, self.query)
        }
    }

    /// URL without the query string.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.url
    }

    /// Replace the target URL; its query string replaces the current query.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidUri`] if `url` is not an absolute URL.
    pub fn set_url(&mut self, url: &str) -> Result<(), HttpError> {
        let parsed = Url::parse(url)
            .map_err(|e| HttpError::invalid_uri(url, InvalidUriKind::ParseError, e))?;
        self.set_parsed_url(parsed);
        Ok(())
    }

    pub fn set_parsed_url(&mut self, url: Url) {
        let (url, query) = split_query(url);
        self.url = url;
        self.query = query;
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderCollection {
        &mut self.headers
    }

    /// Shortcut for `headers_mut().set(..)`.
    ///
    /// # Errors
    /// Returns an error for invalid header names or values.
    pub fn set_header(
        &mut self,
        name: &str,
        values: impl Into<HeaderValues>,
    ) -> Result<(), HttpError> {
        self.headers.set(name, values)
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    #[must_use]
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RequestConfig {
        &mut self.config
    }
}

fn split_query(mut url: Url) -> (Url, Query) {
    let query = url.query().map(Query::parse).unwrap_or_default();
    url.set_query(None);
    url.set_fragment(None);
    (url, query)
}

/// A received (or synthesized) HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    reason: String,
    headers: HeaderCollection,
    body: Bytes,
    effective_url: Option<String>,
}

impl Response {
    /// Create an empty response with the canonical reason phrase.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: HeaderCollection::new(),
            body: Bytes::new(),
            effective_url: None,
        }
    }

    /// Create a response from a numeric status code.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidInput`] for codes outside 100..=999.
    pub fn with_status(code: u16) -> Result<Self, HttpError> {
        StatusCode::from_u16(code)
            .map(Self::new)
            .map_err(|e| HttpError::InvalidInput(format!("status {code}: {e}")))
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderCollection) -> Self {
        self.headers = headers;
        self
    }

    /// Add a header value.
    ///
    /// # Errors
    /// Returns an error for invalid header names or values.
    pub fn with_header(
        mut self,
        name: &str,
        values: impl Into<HeaderValues>,
    ) -> Result<Self, HttpError> {
        self.headers.add(name, values)?;
        Ok(self)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    #[must_use]
    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderCollection {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    /// Returns [`HttpError::Json`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// URL that produced this response, once the pipeline has completed it.
    #[must_use]
    pub fn effective_url(&self) -> Option<&str> {
        self.effective_url.as_deref()
    }

    /// Record the effective URL. Only the first call has an effect.
    pub fn set_effective_url(&mut self, url: impl Into<String>) {
        if self.effective_url.is_none() {
            self.effective_url = Some(url.into());
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub fn is_redirection(&self) -> bool {
        self.status.is_redirection()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_request_splits_query_from_url() {
        let request = Request::new(Method::GET, "http://example.com/a?x=1&y=2#frag").unwrap();
        assert_eq!(request.base_url().as_str(), "http://example.com/a");
        assert_eq!(request.query().len(), 2);
        assert_eq!(request.url(), "http://example.com/a?x=1&y=2");
        assert_eq!(request.host(), Some("example.com"));
        assert_eq!(request.port(), Some(80));
    }

    #[test]
    fn test_clones_share_identity() {
        let request = Request::new(Method::GET, "http://example.com").unwrap();
        let other = Request::new(Method::GET, "http://example.com").unwrap();
        let mut clone = request.clone();
        clone.set_method(Method::POST);

        assert_eq!(request.id(), clone.id());
        assert_ne!(request.id(), other.id());
    }

    #[test]
    fn test_set_url_replaces_query() {
        let mut request = Request::new(Method::GET, "http://example.com/?a=1").unwrap();
        request.set_url("https://other.test/path?b=2").unwrap();
        assert_eq!(request.url(), "https://other.test/path?b=2");
        assert!(request.query().get("a").is_none());
        assert!(request.set_url("not a url").unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_relative_url_rejected() {
        let err = Request::new(Method::GET, "/relative").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::ParseError,
                ..
            }
        ));
    }

    #[test]
    fn test_effective_url_set_once() {
        let mut response = Response::new(StatusCode::OK);
        assert_eq!(response.effective_url(), None);
        response.set_effective_url("http://first.test/");
        response.set_effective_url("http://second.test/");
        assert_eq!(response.effective_url(), Some("http://first.test/"));
    }

    #[test]
    fn test_response_helpers() {
        let response = Response::with_status(201)
            .unwrap()
            .with_body(r#"{"id":7}"#)
            .with_header("Content-Type", "application/json")
            .unwrap();

        assert_eq!(response.reason_phrase(), "Created");
        assert!(response.is_success());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(response.text(), r#"{"id":7}"#);
        assert!(Response::with_status(42).is_err());
    }

    #[test]
    fn test_auth_header_values() {
        assert_eq!(
            Auth::basic("Aladdin", "open sesame").header_value(),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
        assert_eq!(Auth::bearer("abc").header_value(), "Bearer abc");
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let rendered = format!("{:?}", Auth::basic("user", "hunter2"));
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", Auth::bearer("tok")).contains("tok\""));
    }

    #[test]
    fn test_verify_and_auth_deserialize() {
        let verify: Verify = serde_json::from_str("false").unwrap();
        assert_eq!(verify, Verify::Disabled);
        let verify: Verify = serde_json::from_str("\"/etc/ca.pem\"").unwrap();
        assert_eq!(verify, Verify::CaBundle(PathBuf::from("/etc/ca.pem")));
        let verify: Verify = serde_json::from_str("\"native\"").unwrap();
        assert_eq!(verify, Verify::Native);

        let auth: Auth = serde_json::from_str(r#"["user", "pass"]"#).unwrap();
        assert_eq!(auth, Auth::basic("user", "pass"));
        let auth: Auth = serde_json::from_str(r#"{"bearer": "t"}"#).unwrap();
        assert_eq!(auth, Auth::bearer("t"));
    }

    #[test]
    fn test_config_extensions() {
        let mut config = RequestConfig::default();
        assert!(config.allow_redirects);
        assert!(config.exceptions);
        config.set("cache.disable", serde_json::Value::Bool(true));
        assert!(config.has("cache.disable"));
        assert_eq!(config.remove("cache.disable"), Some(serde_json::Value::Bool(true)));
        assert!(config.get("cache.disable").is_none());
    }
}
