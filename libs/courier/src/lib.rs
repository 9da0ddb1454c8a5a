#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Event-driven HTTP client
//!
//! Every request runs through a fixed lifecycle:
//!
//! ```text
//! before -> transport -> complete | error -> end
//! ```
//!
//! Subscribers attached to the client's [`Emitter`] observe and steer each
//! phase: they can rewrite a request, answer it without touching the network,
//! replace a response, recover from a failure or send the request again.
//! Redirects ([`subscriber::RedirectSubscriber`]), retries
//! ([`subscriber::RetrySubscriber`]) and caching ([`cache::CacheSubscriber`])
//! are ordinary subscribers.
//!
//! The transport is pluggable through [`Adapter`] and [`ParallelAdapter`].
//! The default [`HyperAdapter`] provides:
//! - TLS via rustls (webpki roots, OS roots, a CA bundle, or disabled per request)
//! - Connection pooling with HTTP/1.1 and HTTP/2
//! - Transparent response decompression (gzip, brotli, deflate)
//! - A response body size limit applied to decompressed bytes
//!
//! # Example
//!
//! ```no_run
//! use courier::{Client, RequestOptions, RetryConfig};
//!
//! # async fn run() -> Result<(), courier::HttpError> {
//! let client = Client::builder()
//!     .base_url("https://api.example.com/")
//!     .retry(RetryConfig::default())
//!     .build()?;
//!
//! let created = client
//!     .post("users", RequestOptions::new().json(&serde_json::json!({"name": "Alice"}))?)
//!     .await?
//!     .into_result()?;
//! println!("{}", created.status());
//!
//! let requests = vec![
//!     client.create_request(http::Method::GET, "users/1", RequestOptions::new())?,
//!     client.create_request(http::Method::GET, "users/2", RequestOptions::new())?,
//! ];
//! let transaction = client.send_all(requests).await;
//! for (request, outcome) in transaction.iter() {
//!     println!("{} -> {}", request.url(), outcome.is_failure());
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
mod builder;
pub mod cache;
mod client;
mod config;
mod error;
pub mod event;
mod factory;
mod headers;
mod layers;
mod message;
mod options;
mod outcome;
mod query;
pub mod subscriber;
mod tls;
mod transaction;
pub mod uri_template;

pub use adapter::{
    Adapter, ConcurrentAdapter, HyperAdapter, HyperAdapterBuilder, MockAdapter, ParallelAdapter,
    SerialAdapter,
};
pub use builder::ClientBuilder;
pub use client::{Client, MAX_ATTEMPTS};
pub use config::{
    ClientConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT, ExponentialBackoff,
    HyperAdapterConfig, IDEMPOTENCY_KEY_HEADER, RedirectConfig, RedirectMethodPolicy,
    RequestDefaults, RetryConfig, RetryTrigger, TransportSecurity, UrlTemplate,
    is_idempotent_method,
};
pub use error::{BoxError, HttpError, InvalidUriKind};
pub use event::{Emitter, EventName, Subscriber};
pub use factory::{DefaultMessageFactory, Message, MessageFactory};
pub use headers::{HeaderCollection, HeaderValues};
pub use layers::{DefaultHeadersLayer, DefaultHeadersService};
pub use message::{Auth, Request, RequestConfig, RequestId, Response, Verify};
pub use options::RequestOptions;
pub use outcome::{Failure, FailureKind, Outcome, TransferError};
pub use query::{
    CommaAggregator, DuplicateAggregator, Encoding, PhpAggregator, Query, QueryAggregator,
    QueryValue,
};
pub use transaction::Transaction;
