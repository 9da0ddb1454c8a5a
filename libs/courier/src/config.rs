use crate::error::HttpError;
use crate::headers::HeaderCollection;
use crate::message::{Auth, Verify};
use crate::query::{Query, QueryValue};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Default User-Agent string for outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Default maximum response body size (10 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Header that makes non-idempotent requests eligible for idempotent retries
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Lowercase idempotency key header for `HeaderName` construction
const IDEMPOTENCY_KEY_HEADER_LOWER: &str = "idempotency-key";

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Transport-level errors (connection refused, DNS failure, reset, etc.)
    TransportError,
    /// Transfer timeout
    Timeout,
    /// Specific HTTP status code
    Status(u16),
    /// Error that is never retryable (invalid input, subscriber errors, cancellation)
    NonRetryable,
}

impl RetryTrigger {
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);
    pub const REQUEST_TIMEOUT: Self = Self::Status(408);
    pub const INTERNAL_SERVER_ERROR: Self = Self::Status(500);
    pub const BAD_GATEWAY: Self = Self::Status(502);
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);
    pub const GATEWAY_TIMEOUT: Self = Self::Status(504);

    /// Classify a pipeline error.
    #[must_use]
    pub fn from_error(err: &HttpError) -> Self {
        match err {
            HttpError::Timeout(_) => Self::Timeout,
            HttpError::Transport(_) | HttpError::Tls(_) => Self::TransportError,
            _ => Self::NonRetryable,
        }
    }
}

/// Check if HTTP method is idempotent (safe to retry) per RFC 9110.
#[must_use]
pub fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET
            | http::Method::HEAD
            | http::Method::PUT
            | http::Method::DELETE
            | http::Method::OPTIONS
            | http::Method::TRACE
    )
}

/// Exponential backoff configuration for retries
///
/// Computes delay as: `min(initial * multiplier^attempt, max)` with optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Initial backoff duration (default: 100ms)
    pub initial: Duration,
    /// Maximum backoff duration (default: 10s)
    pub max: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,
    /// Add 0-25% random delay to each backoff (default: true)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Millisecond delays without jitter, for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(30),
            multiplier: 3.0,
            jitter: true,
        }
    }
}

/// Retry policy consumed by [`RetrySubscriber`](crate::subscriber::RetrySubscriber).
///
/// Non-idempotent methods (POST, PATCH) are only retried on triggers in
/// `always_retry` unless the request carries the idempotency key header.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt (0 = no retries, default: 3)
    pub max_retries: usize,

    pub backoff: ExponentialBackoff,

    /// Triggers that retry regardless of method. Default: `[Status(429)]`
    pub always_retry: HashSet<RetryTrigger>,

    /// Triggers that retry only idempotent methods or requests with an idempotency key.
    /// Default: `[TransportError, Timeout, 408, 500, 502, 503, 504]`
    pub idempotent_retry: HashSet<RetryTrigger>,

    /// Ignore `Retry-After` and always use the backoff policy (default: false)
    pub ignore_retry_after: bool,

    /// Header that makes non-idempotent requests eligible for `idempotent_retry`.
    /// `None` disables the escape hatch.
    pub idempotency_key_header: Option<http::header::HeaderName>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::default(),
            always_retry: HashSet::from([RetryTrigger::TOO_MANY_REQUESTS]),
            idempotent_retry: HashSet::from([
                RetryTrigger::TransportError,
                RetryTrigger::Timeout,
                RetryTrigger::REQUEST_TIMEOUT,
                RetryTrigger::INTERNAL_SERVER_ERROR,
                RetryTrigger::BAD_GATEWAY,
                RetryTrigger::SERVICE_UNAVAILABLE,
                RetryTrigger::GATEWAY_TIMEOUT,
            ]),
            ignore_retry_after: false,
            idempotency_key_header: Some(http::header::HeaderName::from_static(
                IDEMPOTENCY_KEY_HEADER_LOWER,
            )),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry every transient condition for any method.
    ///
    /// **WARNING**: non-idempotent requests may be duplicated.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            backoff: ExponentialBackoff::aggressive(),
            always_retry: HashSet::from([
                RetryTrigger::TransportError,
                RetryTrigger::Timeout,
                RetryTrigger::TOO_MANY_REQUESTS,
                RetryTrigger::REQUEST_TIMEOUT,
                RetryTrigger::INTERNAL_SERVER_ERROR,
                RetryTrigger::BAD_GATEWAY,
                RetryTrigger::SERVICE_UNAVAILABLE,
                RetryTrigger::GATEWAY_TIMEOUT,
            ]),
            idempotent_retry: HashSet::new(),
            ..Default::default()
        }
    }

    /// Whether `trigger` should retry a request with this method.
    #[must_use]
    pub fn should_retry(
        &self,
        trigger: RetryTrigger,
        method: &http::Method,
        has_idempotency_key: bool,
    ) -> bool {
        if self.always_retry.contains(&trigger) {
            return true;
        }
        self.idempotent_retry.contains(&trigger)
            && (is_idempotent_method(method) || has_idempotency_key)
    }
}

/// Redirect policy consumed by [`RedirectSubscriber`](crate::subscriber::RedirectSubscriber).
///
/// Redirects are followed only for requests whose `allow_redirects` is set.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Maximum redirects per request (default: 5). `0` disables following.
    pub max_redirects: usize,

    /// Only follow same-origin redirects unless the host is allow-listed (default: false)
    pub same_origin_only: bool,

    /// Hostnames (no scheme or port) allowed when `same_origin_only` is set
    pub allowed_redirect_hosts: HashSet<String>,

    /// Drop `Authorization`, `Cookie` and `Proxy-Authorization` on cross-origin hops (default: true)
    pub strip_sensitive_headers: bool,

    /// Allow HTTPS to HTTP downgrades (default: false)
    pub allow_https_downgrade: bool,

    /// How 301/302 treat the method and body. 303 always switches to GET.
    pub method_policy: RedirectMethodPolicy,
}

/// Method handling for 301 and 302 redirects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectMethodPolicy {
    /// Switch non-GET/HEAD requests to a bodiless GET, like most browsers
    #[default]
    Browser,
    /// Keep the method and body (RFC 9110)
    Strict,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            max_redirects: 5,
            same_origin_only: false,
            allowed_redirect_hosts: HashSet::new(),
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
            method_policy: RedirectMethodPolicy::Browser,
        }
    }
}

impl RedirectConfig {
    /// Follow redirects to any host, still stripping credentials and blocking downgrades.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_redirects: 10,
            ..Default::default()
        }
    }

    /// Same-origin only, for clients talking to a single trusted service.
    #[must_use]
    pub fn same_origin() -> Self {
        Self {
            same_origin_only: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_redirects: 0,
            ..Default::default()
        }
    }

    /// Permissive and allowing downgrades, for plain-HTTP mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_redirects: 10,
            allow_https_downgrade: true,
            ..Default::default()
        }
    }
}

/// Whether the network adapter may open plain-HTTP connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportSecurity {
    /// `http://` and `https://` URLs are both accepted
    #[default]
    HttpsOrHttp,
    /// Only `https://` URLs are accepted
    HttpsOnly,
}

/// Network adapter configuration
#[derive(Debug, Clone)]
pub struct HyperAdapterConfig {
    /// Added to requests without their own `User-Agent`
    pub user_agent: String,

    /// Maximum decompressed response body size (default: 10 MiB)
    pub max_body_size: usize,

    pub transport: TransportSecurity,

    /// Idle connection lifetime in the pool (default: 90s). `None` keeps them forever.
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HyperAdapterConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            transport: TransportSecurity::HttpsOrHttp,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HyperAdapterConfig {
    /// Small pool with short idle timeout, for tests against local mock servers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            pool_idle_timeout: Some(Duration::from_secs(5)),
            pool_max_idle_per_host: 2,
            ..Default::default()
        }
    }
}

/// A URL given as a plain string or as a `[template, variables]` pair.
///
/// Used for the client's base URL and for per-request URLs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UrlTemplate {
    Plain(String),
    Template(String, BTreeMap<String, String>),
}

impl UrlTemplate {
    /// The URL with template variables expanded.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidUri`] for a malformed template.
    pub fn expand(&self) -> Result<String, HttpError> {
        match self {
            UrlTemplate::Plain(url) => Ok(url.clone()),
            UrlTemplate::Template(template, vars) => crate::uri_template::expand(template, vars),
        }
    }
}

impl From<&str> for UrlTemplate {
    fn from(url: &str) -> Self {
        UrlTemplate::Plain(url.to_owned())
    }
}

impl From<String> for UrlTemplate {
    fn from(url: String) -> Self {
        UrlTemplate::Plain(url)
    }
}

impl From<&String> for UrlTemplate {
    fn from(url: &String) -> Self {
        UrlTemplate::Plain(url.clone())
    }
}

impl<T: Into<String>> From<(T, BTreeMap<String, String>)> for UrlTemplate {
    fn from((template, vars): (T, BTreeMap<String, String>)) -> Self {
        UrlTemplate::Template(template.into(), vars)
    }
}

/// Request defaults applied by [`Client::create_request`](crate::Client::create_request).
///
/// Per-call options win; headers and query merge key by key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestDefaults {
    #[serde(deserialize_with = "deserialize_headers")]
    pub headers: HeaderCollection,
    #[serde(deserialize_with = "deserialize_query")]
    pub query: Query,
    pub allow_redirects: bool,
    pub exceptions: bool,
    pub verify: Verify,
    pub auth: Option<Auth>,
    /// Per-transfer timeout (seconds in configuration files)
    #[serde(deserialize_with = "deserialize_timeout")]
    pub timeout: Option<Duration>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            headers: HeaderCollection::new(),
            query: Query::new(),
            allow_redirects: true,
            exceptions: true,
            verify: Verify::Enabled,
            auth: None,
            timeout: None,
        }
    }
}

/// Client configuration, loadable from any serde format.
///
/// ```
/// use courier::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(r#"{
///     "base_url": ["https://api.example.com/{version}/", {"version": "v2"}],
///     "defaults": {"timeout": 2.5, "headers": {"Accept": "application/json"}}
/// }"#).unwrap();
/// assert_eq!(config.base_url.unwrap().expand().unwrap(), "https://api.example.com/v2/");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: Option<UrlTemplate>,
    pub defaults: RequestDefaults,
}

/// A header map value: one string or a list of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(values: OneOrMany) -> Self {
        match values {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// Visits a map in document order, so header and query order survive.
struct HeadersVisitor;

impl<'de> Visitor<'de> for HeadersVisitor {
    type Value = HeaderCollection;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of header names to a value or list of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut headers = HeaderCollection::new();
        while let Some((name, values)) = map.next_entry::<String, OneOrMany>()? {
            headers
                .add(&name, Vec::from(values))
                .map_err(de::Error::custom)?;
        }
        Ok(headers)
    }
}

struct QueryVisitor;

impl<'de> Visitor<'de> for QueryVisitor {
    type Value = Query;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of query keys to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut query = Query::new();
        while let Some((key, value)) = map.next_entry::<String, QueryValue>()? {
            query.set(&key, value);
        }
        Ok(query)
    }
}

fn deserialize_headers<'de, D>(deserializer: D) -> Result<HeaderCollection, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_map(HeadersVisitor)
}

fn deserialize_query<'de, D>(deserializer: D) -> Result<Query, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_map(QueryVisitor)
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(secs) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| de::Error::custom(format!("invalid timeout: {secs}")))
}
