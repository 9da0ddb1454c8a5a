//! Standard subscribers: redirects, retries, request history and canned responses.
//!
//! None of these are special to the pipeline; they use the same
//! [`Subscriber`](crate::event::Subscriber) hooks as user code.

mod history;
mod mock;
mod redirect;
mod retry;

pub use history::{HistoryEntry, HistorySubscriber};
pub use mock::{MockEntry, MockSubscriber};
pub use redirect::RedirectSubscriber;
pub use retry::{RETRY_ATTEMPT_HEADER, RetrySubscriber, calculate_backoff, parse_retry_after};
