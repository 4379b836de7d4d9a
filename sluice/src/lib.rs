//! # sluice
//!
//! `sluice` sits in front of an asynchronous HTTP transport and decides, for
//! each request, whether to serve a shared in-flight or cached result or to go
//! to the network, and how often to try again when the network answers badly.
//!
//! ## Features
//!
//! - **Load coalescing**: concurrent identical GETs cause one transport call and
//!   every caller sees the same outcome.
//! - **Response cache**: results expire a fixed time after they were written,
//!   the table is bounded with least recently used eviction and a background
//!   task sweeps expired entries.
//! - **Retries**: status codes listed on a request are retried up to its
//!   `max_retries`, connect and IO failures up to `max_request_retry`.
//! - **Cancellation**: dropping or cancelling a [`ResponseFuture`] stops the
//!   transport work it owns. A cache waiter only detaches itself.
//! - **Bounded concurrency**: retries and cache loads share one [`WorkerPool`].
//!
//! ## Modules
//!
//! - `client`: [`Client`] and [`ClientBuilder`].
//! - `completion`: the future every request resolves through.
//! - `handler`: callback traits for transports and callers.
//! - `transport`: the [`Transport`] trait and the `reqwest` implementation.
//! - `filter`: request, response and IO-failure filters.
//! - `config` and `cache`: re-exported member crates.
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::collapsible_if)]
pub mod client;
pub mod completion;
pub mod error;
pub mod filter;
pub mod handler;
pub mod pool;
pub mod prelude;
pub mod request;
pub mod response;
pub mod retry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use completion::ResponseFuture;
pub use error::{ClientError, TransportError, TransportErrorKind};
pub use handler::{AsyncHandler, HandlerState, ResponseCollector, TransportHandler};
pub use pool::WorkerPool;
pub use request::{Fingerprint, Request, RequestBuilder};
pub use response::Response;
pub use retry::Attempt;
pub use transport::{HttpTransport, InFlight, Transport, TransportConfig};

pub use sluice_cache as cache;
pub use sluice_config as config;
// re-export
pub use bytes;
pub use reqwest;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
