use crate::adapter::{Adapter, ConcurrentAdapter, DEFAULT_MAX_CONCURRENCY, HyperAdapter, ParallelAdapter};
use crate::client::Client;
use crate::config::{ClientConfig, DEFAULT_USER_AGENT, RedirectConfig, RequestDefaults, RetryConfig, UrlTemplate};
use crate::error::{HttpError, InvalidUriKind};
use crate::event::{Emitter, EventName, Subscriber};
use crate::factory::{DefaultMessageFactory, MessageFactory};
use crate::headers::HeaderValues;
use crate::message::Auth;
use crate::subscriber::{RedirectSubscriber, RetrySubscriber};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Builder for a [`Client`].
///
/// Without further configuration the client sends requests over the network
/// with [`HyperAdapter`], batches them through a [`ConcurrentAdapter`] allowing
/// 50 transfers in flight, follows redirects with the default
/// [`RedirectConfig`] and does not retry.
pub struct ClientBuilder {
    base_url: Option<UrlTemplate>,
    defaults: RequestDefaults,
    adapter: Option<Arc<dyn Adapter>>,
    parallel_adapter: Option<Arc<dyn ParallelAdapter>>,
    message_factory: Arc<dyn MessageFactory>,
    max_concurrency: usize,
    redirect: Option<RedirectConfig>,
    retry: Option<RetryConfig>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    /// First invalid header passed to `default_header`, reported by `build`
    error: Option<HttpError>,
}

impl ClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: None,
            defaults: RequestDefaults::default(),
            adapter: None,
            parallel_adapter: None,
            message_factory: Arc::new(DefaultMessageFactory),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            redirect: Some(RedirectConfig::default()),
            retry: None,
            subscribers: Vec::new(),
            error: None,
        }
    }

    /// Create a builder from deserialized configuration
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            base_url: config.base_url,
            defaults: config.defaults,
            ..Self::new()
        }
    }

    /// Base URL relative request URLs are resolved against.
    ///
    /// Accepts a plain URL or a `(template, variables)` pair.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<UrlTemplate>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Replace all request defaults
    #[must_use]
    pub fn defaults(mut self, defaults: RequestDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set a header sent with every request unless overridden per call.
    ///
    /// An invalid name or value is reported by [`ClientBuilder::build`].
    #[must_use]
    pub fn default_header(mut self, name: &str, values: impl Into<HeaderValues>) -> Self {
        if self.error.is_none()
            && let Err(e) = self.defaults.headers.set(name, values)
        {
            self.error = Some(e);
        }
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(self, user_agent: &str) -> Self {
        self.default_header("User-Agent", user_agent)
    }

    /// Default per-request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = Some(timeout);
        self
    }

    /// Default credentials
    #[must_use]
    pub fn auth(mut self, auth: Auth) -> Self {
        self.defaults.auth = Some(auth);
        self
    }

    /// Whether failed requests are returned as `Err` by default (default: true)
    #[must_use]
    pub fn exceptions(mut self, exceptions: bool) -> Self {
        self.defaults.exceptions = exceptions;
        self
    }

    /// Adapter for single requests (default: [`HyperAdapter`])
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Adapter for batches (default: [`ConcurrentAdapter`] over the single-request adapter)
    #[must_use]
    pub fn parallel_adapter(mut self, adapter: Arc<dyn ParallelAdapter>) -> Self {
        self.parallel_adapter = Some(adapter);
        self
    }

    #[must_use]
    pub fn message_factory(mut self, factory: Arc<dyn MessageFactory>) -> Self {
        self.message_factory = factory;
        self
    }

    /// Maximum requests whose event phases or default transfers run at once in `send_all`.
    ///
    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Redirect policy for the built-in [`RedirectSubscriber`]
    #[must_use]
    pub fn redirect(mut self, config: RedirectConfig) -> Self {
        self.redirect = Some(config);
        self
    }

    /// Do not attach the redirect subscriber; 3xx responses are returned as is
    #[must_use]
    pub fn no_redirects(mut self) -> Self {
        self.redirect = None;
        self
    }

    /// Attach a [`RetrySubscriber`] with this policy
    #[must_use]
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Attach a subscriber to the client's emitter
    #[must_use]
    pub fn subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    /// Returns an error if a default header or the base URL is invalid, or if
    /// the default network adapter cannot be initialized.
    pub fn build(mut self) -> Result<Client, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let base_url = self.base_url.as_ref().map(parse_base_url).transpose()?;

        if !self.defaults.headers.has("User-Agent") {
            self.defaults.headers.set("User-Agent", DEFAULT_USER_AGENT)?;
        }

        let adapter: Arc<dyn Adapter> = match self.adapter {
            Some(adapter) => adapter,
            None => Arc::new(HyperAdapter::builder().build()?),
        };
        let parallel_adapter = self.parallel_adapter.unwrap_or_else(|| {
            Arc::new(ConcurrentAdapter::new(Arc::clone(&adapter), self.max_concurrency))
        });

        let emitter = Emitter::new();
        if let Some(config) = self.redirect {
            emitter.attach(Arc::new(RedirectSubscriber::new(config)));
        }
        if let Some(config) = self.retry {
            emitter.attach(Arc::new(RetrySubscriber::new(config)));
        }
        for subscriber in self.subscribers {
            emitter.attach(subscriber);
        }

        tracing::debug!(
            base_url = ?base_url.as_ref().map(Url::as_str),
            max_concurrency = self.max_concurrency,
            complete_listeners = emitter.listener_count(EventName::Complete),
            "Client built"
        );

        Ok(Client::assemble(
            base_url,
            self.defaults,
            adapter,
            parallel_adapter,
            self.message_factory,
            emitter,
            self.max_concurrency,
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_base_url(template: &UrlTemplate) -> Result<Url, HttpError> {
    let expanded = template.expand()?;
    let url = Url::parse(&expanded)
        .map_err(|e| HttpError::invalid_uri(&expanded, InvalidUriKind::ParseError, e))?;
    if url.cannot_be_a_base() {
        return Err(HttpError::invalid_uri(
            &expanded,
            InvalidUriKind::ParseError,
            "base URL cannot have relative URLs resolved against it",
        ));
    }
    Ok(url)
}
