//! Tower layers applied inside the network adapter's service stack.
//!
//! - [`DefaultHeadersLayer`] - Fills in adapter-wide headers such as `User-Agent`

mod default_headers;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
