use crate::headers::HeaderCollection;
use crate::message::{Request, Response};
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use xxhash_rust::xxh3::Xxh3;

/// Largest `Age` honored; larger values are clamped (RFC 9111 section 1.2.2).
const MAX_AGE_SECS: u64 = 1 << 31;

/// Statuses cacheable by default (RFC 9111 section 4.2.2 heuristics aside).
const CACHEABLE_STATUSES: &[u16] = &[200, 203, 204, 300, 301, 404, 405, 410, 414, 501];

/// Cache key: hash of method and full URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    #[must_use]
    pub fn new(method: &Method, url: &str) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(url.as_bytes());
        Self(hasher.digest())
    }

    #[must_use]
    pub fn of(request: &Request) -> Self {
        Self::new(request.method(), &request.url())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Parsed `Cache-Control` directives; names lowercased, quotes stripped.
struct CacheControl(HashMap<String, Option<String>>);

impl CacheControl {
    fn parse(headers: &HeaderCollection) -> Self {
        let directives = headers
            .get("Cache-Control")
            .into_iter()
            .flatten()
            .flat_map(|value| value.split(','))
            .filter_map(|directive| {
                let directive = directive.trim();
                if directive.is_empty() {
                    return None;
                }
                Some(match directive.split_once('=') {
                    Some((name, arg)) => (
                        name.trim().to_ascii_lowercase(),
                        Some(arg.trim().trim_matches('"').to_owned()),
                    ),
                    None => (directive.to_ascii_lowercase(), None),
                })
            })
            .collect();
        Self(directives)
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn seconds(&self, name: &str) -> Option<u64> {
        self.0.get(name)?.as_deref()?.parse().ok()
    }
}

fn freshness_lifetime(headers: &HeaderCollection, stored_at: SystemTime) -> Option<Duration> {
    let control = CacheControl::parse(headers);
    if let Some(secs) = control.seconds("s-maxage").or_else(|| control.seconds("max-age")) {
        return Some(Duration::from_secs(secs));
    }

    let expires = headers.first("Expires")?;
    // An invalid Expires means already expired
    let Ok(expires) = httpdate::parse_http_date(expires.trim()) else {
        return Some(Duration::ZERO);
    };
    let date = headers
        .first("Date")
        .and_then(|date| httpdate::parse_http_date(date.trim()).ok())
        .unwrap_or(stored_at);
    Some(expires.duration_since(date).unwrap_or(Duration::ZERO))
}

fn has_validators(headers: &HeaderCollection) -> bool {
    headers.has("ETag") || headers.has("Last-Modified")
}

/// A stored response with the time it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    response: Response,
    stored_at: SystemTime,
    /// Request header values named by the response's `Vary`, as seen when stored
    vary: Vec<(String, Option<String>)>,
}

impl CacheEntry {
    /// Entry for `response` to `request`, stored now.
    #[must_use]
    pub fn new(request: &Request, response: Response) -> Self {
        let vary = response
            .headers()
            .get("Vary")
            .into_iter()
            .flatten()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                let seen = request.headers().get_joined(name);
                (name.to_ascii_lowercase(), seen)
            })
            .collect();

        Self {
            response,
            stored_at: SystemTime::now(),
            vary,
        }
    }

    /// The same entry with another storage time, e.g. after a successful revalidation.
    #[must_use]
    pub fn with_stored_at(mut self, stored_at: SystemTime) -> Self {
        self.stored_at = stored_at;
        self
    }

    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    #[must_use]
    pub fn stored_at(&self) -> SystemTime {
        self.stored_at
    }

    /// Whether `response` to `request` may be stored at all.
    ///
    /// Requires a safe method, a cacheable status, no `no-store` on either
    /// side, no `Vary: *`, and freshness information or a validator.
    #[must_use]
    pub fn is_storable(request: &Request, response: &Response) -> bool {
        if !matches!(*request.method(), Method::GET | Method::HEAD)
            || !CACHEABLE_STATUSES.contains(&response.status_code())
            || CacheControl::parse(request.headers()).has("no-store")
            || CacheControl::parse(response.headers()).has("no-store")
        {
            return false;
        }
        let vary_all = response
            .headers()
            .get("Vary")
            .into_iter()
            .flatten()
            .any(|value| value.split(',').any(|name| name.trim() == "*"));
        if vary_all {
            return false;
        }

        freshness_lifetime(response.headers(), SystemTime::now()).is_some()
            || has_validators(response.headers())
    }

    /// Freshness lifetime: `s-maxage`, else `max-age`, else `Expires` minus
    /// `Date` (or minus the storage time). `None` without freshness information.
    #[must_use]
    pub fn lifetime(&self) -> Option<Duration> {
        freshness_lifetime(self.response.headers(), self.stored_at)
    }

    /// Age at `now`: time since storage plus the `Age` the response arrived with.
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        let initial = self
            .response
            .headers()
            .first("Age")
            .and_then(|age| age.trim().parse::<u64>().ok())
            .map_or(Duration::ZERO, |secs| Duration::from_secs(secs.min(MAX_AGE_SECS)));
        initial.saturating_add(now.duration_since(self.stored_at).unwrap_or(Duration::ZERO))
    }

    /// Whether the entry can be served at `now` without revalidation.
    ///
    /// `no-cache` entries and entries with a zero or unknown lifetime are stale.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        if CacheControl::parse(self.response.headers()).has("no-cache") {
            return false;
        }
        self.lifetime()
            .is_some_and(|lifetime| self.age(now) < lifetime)
    }

    /// Whether the response carries `ETag` or `Last-Modified`.
    #[must_use]
    pub fn has_validators(&self) -> bool {
        has_validators(self.response.headers())
    }

    /// Whether `request` sends the same `Vary` header values as the stored one.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        self.vary
            .iter()
            .all(|(name, seen)| request.headers().get_joined(name) == *seen)
    }
}
