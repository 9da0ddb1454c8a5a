use super::events::{BeforeEvent, CompleteEvent, EndEvent, ErrorEvent};
use super::EventName;
use crate::error::BoxError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Observer of the request lifecycle.
///
/// `events` names the phases to listen to and the priority for each; only
/// those handlers are called. An `Err` from `on_before` or `on_complete`
/// turns into an `error` event, an `Err` from `on_error` becomes the final
/// failure, and an `Err` from `on_end` is logged and dropped.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Phases and priorities (higher runs first).
    fn events(&self) -> Vec<(EventName, i32)>;

    async fn on_before(&self, _event: &mut BeforeEvent) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_complete(&self, _event: &mut CompleteEvent) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_error(&self, _event: &mut ErrorEvent) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_end(&self, _event: &mut EndEvent) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Handle returned by [`Emitter::attach`], used to detach the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    priority: i32,
    seq: u64,
    subscriber: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    next_seq: u64,
    listeners: HashMap<EventName, Vec<Registration>>,
}

/// Priority-ordered publish/subscribe channel for lifecycle events.
///
/// Listener lists are copied at the start of each dispatch, so subscribers
/// attached or detached while an event is being dispatched only see later events.
#[derive(Default)]
pub struct Emitter {
    registry: RwLock<Registry>,
}

type BeforeFn = dyn Fn(&mut BeforeEvent) -> Result<(), BoxError> + Send + Sync;
type CompleteFn = dyn Fn(&mut CompleteEvent) -> Result<(), BoxError> + Send + Sync;
type ErrorFn = dyn Fn(&mut ErrorEvent) -> Result<(), BoxError> + Send + Sync;
type EndFn = dyn Fn(&mut EndEvent) -> Result<(), BoxError> + Send + Sync;

enum Handler {
    Before(Box<BeforeFn>),
    Complete(Box<CompleteFn>),
    Error(Box<ErrorFn>),
    End(Box<EndFn>),
}

/// Subscriber backed by a single synchronous closure.
struct FnSubscriber {
    priority: i32,
    handler: Handler,
}

#[async_trait]
impl Subscriber for FnSubscriber {
    fn events(&self) -> Vec<(EventName, i32)> {
        let name = match self.handler {
            Handler::Before(_) => EventName::Before,
            Handler::Complete(_) => EventName::Complete,
            Handler::Error(_) => EventName::Error,
            Handler::End(_) => EventName::End,
        };
        vec![(name, self.priority)]
    }

    async fn on_before(&self, event: &mut BeforeEvent) -> Result<(), BoxError> {
        if let Handler::Before(f) = &self.handler {
            f(event)
        } else {
            Ok(())
        }
    }

    async fn on_complete(&self, event: &mut CompleteEvent) -> Result<(), BoxError> {
        if let Handler::Complete(f) = &self.handler {
            f(event)
        } else {
            Ok(())
        }
    }

    async fn on_error(&self, event: &mut ErrorEvent) -> Result<(), BoxError> {
        if let Handler::Error(f) = &self.handler {
            f(event)
        } else {
            Ok(())
        }
    }

    async fn on_end(&self, event: &mut EndEvent) -> Result<(), BoxError> {
        if let Handler::End(f) = &self.handler {
            f(event)
        } else {
            Ok(())
        }
    }
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for every phase it names.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let events = subscriber.events();
        let mut registry = self.registry.write();

        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;

        for (name, priority) in events {
            let seq = registry.next_seq;
            registry.next_seq += 1;

            let listeners = registry.listeners.entry(name).or_default();
            listeners.push(Registration {
                id,
                priority,
                seq,
                subscriber: Arc::clone(&subscriber),
            });
            listeners.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        }

        id
    }

    /// Remove every registration made by [`Emitter::attach`] for `id`.
    ///
    /// Returns `false` if nothing was registered under `id`.
    pub fn detach(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        let mut removed = false;
        for listeners in registry.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|r| r.id != id);
            removed |= listeners.len() != before;
        }
        removed
    }

    /// Shortcut for a closure listening to `before`.
    pub fn on_before<F>(&self, priority: i32, f: F) -> SubscriptionId
    where
        F: Fn(&mut BeforeEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.attach_fn(priority, Handler::Before(Box::new(f)))
    }

    /// Shortcut for a closure listening to `complete`.
    pub fn on_complete<F>(&self, priority: i32, f: F) -> SubscriptionId
    where
        F: Fn(&mut CompleteEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.attach_fn(priority, Handler::Complete(Box::new(f)))
    }

    /// Shortcut for a closure listening to `error`.
    pub fn on_error<F>(&self, priority: i32, f: F) -> SubscriptionId
    where
        F: Fn(&mut ErrorEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.attach_fn(priority, Handler::Error(Box::new(f)))
    }

    /// Shortcut for a closure listening to `end`.
    pub fn on_end<F>(&self, priority: i32, f: F) -> SubscriptionId
    where
        F: Fn(&mut EndEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.attach_fn(priority, Handler::End(Box::new(f)))
    }

    fn attach_fn(&self, priority: i32, handler: Handler) -> SubscriptionId {
        self.attach(Arc::new(FnSubscriber { priority, handler }))
    }

    /// Number of listeners registered for `name`.
    #[must_use]
    pub fn listener_count(&self, name: EventName) -> usize {
        self.registry
            .read()
            .listeners
            .get(&name)
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, name: EventName) -> Vec<Arc<dyn Subscriber>> {
        self.registry
            .read()
            .listeners
            .get(&name)
            .map(|listeners| {
                listeners
                    .iter()
                    .map(|r| Arc::clone(&r.subscriber))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Dispatch `before`. Stops at the first subscriber error.
    ///
    /// # Errors
    /// Returns the first error raised by a subscriber.
    pub async fn emit_before(&self, event: &mut BeforeEvent) -> Result<(), BoxError> {
        for subscriber in self.snapshot(EventName::Before) {
            subscriber.on_before(event).await?;
            if event.is_propagation_stopped() {
                break;
            }
        }
        Ok(())
    }

    /// Dispatch `complete`. Stops at the first subscriber error.
    ///
    /// # Errors
    /// Returns the first error raised by a subscriber.
    pub async fn emit_complete(&self, event: &mut CompleteEvent) -> Result<(), BoxError> {
        for subscriber in self.snapshot(EventName::Complete) {
            subscriber.on_complete(event).await?;
            if event.is_propagation_stopped() {
                break;
            }
        }
        Ok(())
    }

    /// Dispatch `error`. Stops at the first subscriber error.
    ///
    /// # Errors
    /// Returns the first error raised by a subscriber.
    pub async fn emit_error(&self, event: &mut ErrorEvent) -> Result<(), BoxError> {
        for subscriber in self.snapshot(EventName::Error) {
            subscriber.on_error(event).await?;
            if event.is_propagation_stopped() {
                break;
            }
        }
        Ok(())
    }

    /// Dispatch `end`. Subscriber errors are logged and the remaining subscribers still run.
    pub async fn emit_end(&self, event: &mut EndEvent) {
        for subscriber in self.snapshot(EventName::End) {
            if let Err(e) = subscriber.on_end(event).await {
                tracing::error!(
                    request_id = %event.request().id(),
                    error = %e,
                    "end subscriber failed; error ignored"
                );
            }
            if event.is_propagation_stopped() {
                break;
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::message::{Request, Response};
    use crate::outcome::Outcome;
    use http::{Method, StatusCode};
    use parking_lot::Mutex;

    fn before_event() -> BeforeEvent {
        BeforeEvent::new(Request::new(Method::GET, "http://example.com").unwrap())
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl Fn(&mut BeforeEvent) -> Result<(), BoxError> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| {
            log.lock().push(tag);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_priority_then_registration_order() {
        let emitter = Emitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on_before(0, recorder(&log, "zero-a"));
        emitter.on_before(10, recorder(&log, "ten"));
        emitter.on_before(0, recorder(&log, "zero-b"));
        emitter.on_before(-5, recorder(&log, "minus"));

        emitter.emit_before(&mut before_event()).await.unwrap();
        assert_eq!(*log.lock(), vec!["ten", "zero-a", "zero-b", "minus"]);
    }

    #[tokio::test]
    async fn test_stop_propagation_skips_rest_of_phase() {
        let emitter = Emitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on_before(10, |event| {
            event.stop_propagation();
            Ok(())
        });
        emitter.on_before(0, recorder(&log, "skipped"));

        emitter.emit_before(&mut before_event()).await.unwrap();
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_intercept_does_not_stop_later_subscribers() {
        let emitter = Emitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on_before(10, |event| {
            event.intercept(Response::new(StatusCode::OK));
            Ok(())
        });
        emitter.on_before(0, recorder(&log, "after"));

        let mut event = before_event();
        emitter.emit_before(&mut event).await.unwrap();
        assert!(event.is_intercepted());
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_error_stops_dispatch_and_is_returned() {
        let emitter = Emitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on_before(10, |_| Err("boom".into()));
        emitter.on_before(0, recorder(&log, "never"));

        let err = emitter.emit_before(&mut before_event()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_detach_removes_all_registrations() {
        struct Both;

        #[async_trait]
        impl Subscriber for Both {
            fn events(&self) -> Vec<(EventName, i32)> {
                vec![(EventName::Before, 0), (EventName::Complete, 0)]
            }
        }

        let emitter = Emitter::new();
        let id = emitter.attach(Arc::new(Both));
        assert_eq!(emitter.listener_count(EventName::Before), 1);
        assert_eq!(emitter.listener_count(EventName::Complete), 1);

        assert!(emitter.detach(id));
        assert_eq!(emitter.listener_count(EventName::Before), 0);
        assert_eq!(emitter.listener_count(EventName::Complete), 0);
        assert!(!emitter.detach(id));
    }

    #[tokio::test]
    async fn test_registration_during_dispatch_applies_to_next_event() {
        let emitter = Arc::new(Emitter::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_emitter = Arc::clone(&emitter);
        let inner_log = Arc::clone(&log);
        emitter.on_before(0, move |_| {
            let log = Arc::clone(&inner_log);
            inner_emitter.on_before(-1, move |_| {
                log.lock().push("late");
                Ok(())
            });
            Ok(())
        });

        emitter.emit_before(&mut before_event()).await.unwrap();
        assert!(log.lock().is_empty());

        emitter.emit_before(&mut before_event()).await.unwrap();
        assert_eq!(*log.lock(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_end_errors_are_swallowed() {
        let emitter = Emitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on_end(10, |_| Err("ignored".into()));
        let log_clone = Arc::clone(&log);
        emitter.on_end(0, move |_| {
            log_clone.lock().push("ran");
            Ok(())
        });

        let request = Request::new(Method::GET, "http://example.com").unwrap();
        let mut event = EndEvent::new(request, Outcome::Response(Response::new(StatusCode::OK)));
        emitter.emit_end(&mut event).await;
        assert_eq!(*log.lock(), vec!["ran"]);
    }
}
