use crate::config::{ExponentialBackoff, RetryConfig, RetryTrigger};
use crate::error::BoxError;
use crate::event::{CompleteEvent, EndEvent, ErrorEvent, EventName, PRIORITY_VERIFY, Subscriber};
use crate::headers::HeaderCollection;
use crate::message::{Request, RequestId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Header added to retried requests carrying the retry number (1, 2, ...)
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

/// Retries failed transfers and retryable status codes with exponential backoff.
///
/// Listens to `complete` (status triggers such as 429 or 503) and `error`
/// (transport errors and timeouts). Whether a trigger retries depends on the
/// request method and idempotency key, see [`RetryConfig::should_retry`].
/// The backoff delay is awaited inside the subscriber, so it only holds up
/// the retried request.
///
/// ```
/// use courier::{Client, RetryConfig};
///
/// let client = Client::builder()
///     .retry(RetryConfig::default())
///     .build()
///     .unwrap();
/// # let _ = client;
/// ```
#[derive(Debug, Default)]
pub struct RetrySubscriber {
    config: RetryConfig,
    /// Retries performed so far, per in-flight request
    retries: Mutex<HashMap<RequestId, usize>>,
}

impl RetrySubscriber {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn has_idempotency_key(&self, request: &Request) -> bool {
        self.config
            .idempotency_key_header
            .as_ref()
            .is_some_and(|name| request.headers().has(name.as_str()))
    }

    /// Reserve the next retry for `request` if `trigger` allows it.
    ///
    /// Returns the zero-based retry index, used as the backoff exponent.
    fn next_retry(&self, request: &Request, trigger: RetryTrigger) -> Option<usize> {
        if self.config.max_retries == 0
            || !self.config.should_retry(trigger, request.method(), self.has_idempotency_key(request))
        {
            return None;
        }

        let mut retries = self.retries.lock();
        let done = retries.entry(request.id()).or_insert(0);
        if *done >= self.config.max_retries {
            tracing::debug!(
                request_id = %request.id(),
                max_retries = self.config.max_retries,
                trigger = ?trigger,
                "Retries exhausted"
            );
            return None;
        }
        let attempt = *done;
        *done += 1;
        Some(attempt)
    }
}

/// Wait out the backoff, then mark the request with its retry number.
async fn back_off(request: &mut Request, attempt: usize, delay: Duration) {
    tokio::time::sleep(delay).await;
    if let Err(e) = request.set_header(RETRY_ATTEMPT_HEADER, (attempt + 1).to_string()) {
        tracing::debug!(error = %e, "Failed to set retry attempt header");
    }
}

#[async_trait]
impl Subscriber for RetrySubscriber {
    fn events(&self) -> Vec<(EventName, i32)> {
        vec![
            (EventName::Complete, PRIORITY_VERIFY),
            (EventName::Error, PRIORITY_VERIFY),
            (EventName::End, 0),
        ]
    }

    async fn on_complete(&self, event: &mut CompleteEvent) -> Result<(), BoxError> {
        if event.is_retrying() {
            return Ok(());
        }
        let status = event.response().status_code();
        let trigger = RetryTrigger::Status(status);
        let Some(attempt) = self.next_retry(event.request(), trigger) else {
            return Ok(());
        };

        let retry_after = parse_retry_after(event.response().headers());
        let delay = if self.config.ignore_retry_after {
            calculate_backoff(&self.config.backoff, attempt)
        } else {
            retry_after.unwrap_or_else(|| calculate_backoff(&self.config.backoff, attempt))
        };

        tracing::debug!(
            retry = attempt + 1,
            max_retries = self.config.max_retries,
            status,
            trigger = ?trigger,
            method = %event.request().method(),
            url = %event.request().url(),
            request_id = %event.request().id(),
            backoff_ms = delay.as_millis(),
            retry_after_used = retry_after.is_some() && !self.config.ignore_retry_after,
            "Retrying request after status code"
        );
        back_off(event.request_mut(), attempt, delay).await;
        event.retry();
        Ok(())
    }

    async fn on_error(&self, event: &mut ErrorEvent) -> Result<(), BoxError> {
        if event.is_retrying() || event.is_intercepted() {
            return Ok(());
        }
        let trigger = RetryTrigger::from_error(event.cause());
        let Some(attempt) = self.next_retry(event.request(), trigger) else {
            return Ok(());
        };

        let delay = calculate_backoff(&self.config.backoff, attempt);
        tracing::debug!(
            retry = attempt + 1,
            max_retries = self.config.max_retries,
            error = %event.cause(),
            trigger = ?trigger,
            method = %event.request().method(),
            url = %event.request().url(),
            request_id = %event.request().id(),
            backoff_ms = delay.as_millis(),
            "Retrying request after error"
        );
        back_off(event.request_mut(), attempt, delay).await;
        event.retry();
        Ok(())
    }

    async fn on_end(&self, event: &mut EndEvent) -> Result<(), BoxError> {
        self.retries.lock().remove(&event.request().id());
        Ok(())
    }
}

/// Parse a `Retry-After` header into a delay.
///
/// Accepts delta-seconds (`"120"`) and HTTP-dates. Returns `None` when the
/// header is missing, malformed, negative or a date in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderCollection) -> Option<Duration> {
    let value = headers.first("Retry-After")?.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let at = httpdate::parse_http_date(value).ok()?;
    at.duration_since(SystemTime::now()).ok()
}

/// Calculate backoff duration for a given attempt
///
/// Computes `min(initial * multiplier^attempt, max)` plus up to 25% jitter,
/// still capped at `max`. Non-finite or negative settings fall back to safe
/// values instead of panicking.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    // 1 day; anything longer is not a meaningful retry delay
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let attempt = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let initial_secs = backoff.initial.as_secs_f64();
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base = initial_secs * multiplier.powi(attempt);
    let clamped = if base.is_finite() {
        base.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(factor)
    } else {
        duration
    };

    duration.min(Duration::from_secs_f64(max_secs))
}
