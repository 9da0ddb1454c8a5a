//! Request lifecycle events and the emitter that dispatches them.
//!
//! Every request goes through `before`, then (unless intercepted) the
//! transport, then `complete` or `error`, and finally `end`. Subscribers
//! registered on the client's [`Emitter`] observe and steer each phase.
//!
//! Subscribers steer the `error` phase only through [`ErrorEvent`]; how the
//! client resolves it afterwards is not part of the public API:
//!
//! ```compile_fail
//! use courier::event::ErrorResolution;
//! ```

mod emitter;
mod events;

pub use emitter::{Emitter, Subscriber, SubscriptionId};
pub use events::{BeforeAction, BeforeEvent, CompleteEvent, EndEvent, ErrorEvent};
pub(crate) use events::ErrorResolution;

/// Lifecycle phase a subscriber listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Before,
    Complete,
    Error,
    End,
}

/// Run before most subscribers.
pub const PRIORITY_EARLY: i32 = 10_000;

/// Run after most subscribers.
pub const PRIORITY_LATE: i32 = -10_000;

/// Priority of the built-in redirect handling on `complete`.
pub const PRIORITY_REDIRECT: i32 = 200;

/// Priority of response verification (retry decisions) on `complete` and `error`.
pub const PRIORITY_VERIFY: i32 = 100;
