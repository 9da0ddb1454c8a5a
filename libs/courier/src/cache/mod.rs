//! Private HTTP caching with pluggable storage and revalidation.
//!
//! ```
//! use courier::cache::{CacheSubscriber, InMemoryCacheStore, SkipRevalidation};
//! use courier::Client;
//! use std::sync::Arc;
//!
//! let cache = CacheSubscriber::new(
//!     Arc::new(InMemoryCacheStore::default()),
//!     Arc::new(SkipRevalidation),
//! );
//! let client = Client::builder().subscriber(Arc::new(cache)).build().unwrap();
//! # let _ = client;
//! ```

mod entry;
mod revalidation;
mod store;
mod subscriber;

pub use entry::{CacheEntry, Fingerprint};
pub use revalidation::{DefaultRevalidation, Revalidation, SkipRevalidation};
pub use store::{CacheStore, InMemoryCacheStore};
pub use subscriber::{CACHE_CONFIG_KEY, CACHE_HEADER, CacheSubscriber};
