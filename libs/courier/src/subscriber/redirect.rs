//! Secure redirect following
//!
//! Redirect responses are turned into a retry of the same request pointed at
//! the `Location` target. The policy protects against:
//! - SSRF via cross-origin redirects (optional same-origin enforcement)
//! - Credential leakage via `Authorization` or `Cookie` forwarding
//! - HTTPS downgrade attacks
//!
//! When a redirect is not followed the redirect response itself becomes the
//! result of the request.

use crate::config::{RedirectConfig, RedirectMethodPolicy};
use crate::error::BoxError;
use crate::event::{CompleteEvent, EndEvent, EventName, PRIORITY_REDIRECT, Subscriber};
use crate::message::{Request, RequestId};
use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use std::collections::HashMap;
use url::Url;

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[&str] = &["Authorization", "Cookie", "Proxy-Authorization"];

/// Headers describing a body that is dropped when the method switches to GET
const BODY_HEADERS: &[&str] = &["Content-Type", "Content-Length", "Content-Encoding"];

/// Follows 301, 302, 303, 307 and 308 responses for requests with `allow_redirects` set.
///
/// Attached to every client by default; see
/// [`ClientBuilder::redirect`](crate::ClientBuilder::redirect).
#[derive(Debug, Default)]
pub struct RedirectSubscriber {
    config: RedirectConfig,
    /// Redirects followed so far, per in-flight request
    followed: Mutex<HashMap<RequestId, usize>>,
}

impl RedirectSubscriber {
    #[must_use]
    pub fn new(config: RedirectConfig) -> Self {
        Self {
            config,
            followed: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RedirectConfig {
        &self.config
    }

    /// Same scheme, host and port (default ports made explicit).
    fn is_same_origin(original: &Url, target: &Url) -> bool {
        original.scheme() == target.scheme()
            && original.host_str() == target.host_str()
            && original.port_or_known_default() == target.port_or_known_default()
    }

    fn is_https_downgrade(original: &Url, target: &Url) -> bool {
        original.scheme() == "https" && target.scheme() == "http"
    }

    fn is_allowed_host(&self, target: &Url) -> bool {
        target
            .host_str()
            .is_some_and(|host| self.config.allowed_redirect_hosts.contains(host))
    }

    /// Decide whether to follow, returning the resolved target if so.
    fn follow_target(&self, request: &Request, location: &str) -> Option<Url> {
        let original = request.base_url();
        let target = match original.join(location) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!(location, error = %e, "Ignoring unparsable Location header");
                return None;
            }
        };

        if !matches!(target.scheme(), "http" | "https") {
            tracing::warn!(target = %target, "Blocking redirect to non-HTTP scheme");
            return None;
        }

        if !self.config.allow_https_downgrade && Self::is_https_downgrade(original, &target) {
            tracing::warn!(
                original = %original,
                target = %target,
                "Blocking HTTPS to HTTP downgrade redirect"
            );
            return None;
        }

        if self.config.same_origin_only
            && !Self::is_same_origin(original, &target)
            && !self.is_allowed_host(&target)
        {
            tracing::warn!(
                original = %original,
                target = %target,
                "Blocking cross-origin redirect (same_origin_only=true)"
            );
            return None;
        }

        Some(target)
    }

    /// Count the redirect against the limit. `false` once the limit is reached.
    fn record_redirect(&self, id: RequestId) -> bool {
        let mut followed = self.followed.lock();
        let count = followed.entry(id).or_insert(0);
        *count += 1;
        if *count > self.config.max_redirects {
            tracing::debug!(
                request_id = %id,
                count = *count,
                max = self.config.max_redirects,
                "Redirect limit reached"
            );
            return false;
        }
        true
    }

    fn rewrite_request(&self, request: &mut Request, status: u16, target: Url) {
        let switch_to_get = match status {
            303 => *request.method() != Method::HEAD,
            301 | 302 => {
                self.config.method_policy == RedirectMethodPolicy::Browser
                    && !matches!(*request.method(), Method::GET | Method::HEAD)
            }
            _ => false,
        };
        if switch_to_get {
            request.set_method(Method::GET);
            request.set_body(None);
            for name in BODY_HEADERS {
                request.headers_mut().remove(name);
            }
        }

        if !Self::is_same_origin(request.base_url(), &target) {
            tracing::debug!(original = %request.base_url(), target = %target, "Cross-origin redirect detected");
            if self.config.strip_sensitive_headers {
                for name in SENSITIVE_HEADERS {
                    if request.headers_mut().remove(name).is_some() {
                        tracing::debug!(header = *name, "Stripped sensitive header on cross-origin redirect");
                    }
                }
                request.config_mut().auth = None;
            }
        }

        request.headers_mut().remove("Host");
        request.set_parsed_url(target);
    }
}

#[async_trait]
impl Subscriber for RedirectSubscriber {
    fn events(&self) -> Vec<(EventName, i32)> {
        vec![(EventName::Complete, PRIORITY_REDIRECT), (EventName::End, 0)]
    }

    async fn on_complete(&self, event: &mut CompleteEvent) -> Result<(), BoxError> {
        let status = event.response().status_code();
        if !matches!(status, 301 | 302 | 303 | 307 | 308)
            || !event.request().config().allow_redirects
            || event.is_retrying()
        {
            return Ok(());
        }
        let Some(location) = event.response().headers().first("Location").map(str::to_owned)
        else {
            return Ok(());
        };

        let Some(target) = self.follow_target(event.request(), &location) else {
            return Ok(());
        };
        if !self.record_redirect(event.request().id()) {
            return Ok(());
        }

        tracing::debug!(
            request_id = %event.request().id(),
            status,
            target = %target,
            "Following redirect"
        );
        self.rewrite_request(event.request_mut(), status, target);
        event.retry();
        Ok(())
    }

    async fn on_end(&self, event: &mut EndEvent) -> Result<(), BoxError> {
        self.followed.lock().remove(&event.request().id());
        Ok(())
    }
}
