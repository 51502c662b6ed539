//! A retrying, reactor-driven HTTP request engine built on [libcurl].
//!
//! recurl drives requests through curl's multi interface on a dedicated
//! agent thread and hands the caller a future that resolves exactly once.
//! Per-request policies are applied along the way: timeouts for each
//! attempt and an overall deadline for the whole sequence, TLS
//! verification, redirect following, exponential-backoff retries on `5xx`
//! responses and transport failures, and streamed PUT bodies. Every request
//! reports per-attempt statistics and carries a tracing span whose identity
//! is propagated to the server in request headers.
//!
//! ## Sending requests
//!
//! Sending a request is a single chain of calls:
//!
//! ```no_run
//! # fn run() -> Result<(), recurl::Error> {
//! let client = recurl::HttpClient::new()?;
//!
//! let response = client
//!     .get("https://example.org")
//!     .timeout(2_000)
//!     .retry(3, true)
//!     .perform()?;
//!
//! println!("{} {}", response.status(), response.text());
//! # Ok(())
//! # }
//! ```
//!
//! `perform()` blocks by awaiting the same future that
//! [`async_perform`](RequestBuilder::async_perform) returns, so cooperative
//! tasks can await the request instead:
//!
//! ```no_run
//! # async fn run() -> Result<(), recurl::Error> {
//! # let client = recurl::HttpClient::new()?;
//! let future = client.get("https://example.org").async_perform();
//! let handle = future.handle(); // can cancel from anywhere
//! let response = future.await?;
//! # Ok(())
//! # }
//! ```
//!
//! A `4xx` or `5xx` response is not an error: the response is returned and
//! the caller inspects the status. Errors are reserved for transport
//! failures, timeouts, and cancellation — see [`Error`] and [`ErrorKind`].
//!
//! For one-off requests there are module-level shortcuts using a shared
//! client:
//!
//! ```no_run
//! # fn run() -> Result<(), recurl::Error> {
//! let response = recurl::get("https://example.org")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! recurl logs through the [tracing] crate (with `log` compatibility). Set
//! the `recurl::wire` target to trace level to see all data on the wire.
//!
//! [libcurl]: https://curl.haxx.se/libcurl/
//! [tracing]: https://docs.rs/tracing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod body;
mod client;
mod curlext;
mod error;
mod form;
mod handler;
mod parse;
mod request;
mod response;
mod retry;
mod stats;
mod trace;
mod transfer;

pub use crate::client::HttpClient;
pub use crate::error::{Error, ErrorKind};
pub use crate::form::Form;
pub use crate::request::{RequestBuilder, RequestHandle, ResponseFuture};
pub use crate::response::Response;
pub use crate::stats::RequestStats;

/// Re-exported HTTP vocabulary types used in the request surface.
pub use http::{Method, Version};

use once_cell::sync::Lazy;

static SHARED_CLIENT: Lazy<HttpClient> =
    Lazy::new(|| HttpClient::new().expect("failed to create the shared HTTP client"));

/// The shared client behind the module-level convenience functions.
pub fn shared_client() -> &'static HttpClient {
    &SHARED_CLIENT
}

/// Send a GET request to `url` on the shared client.
pub fn get(url: impl Into<String>) -> Result<Response, Error> {
    shared_client().get(url).perform()
}

/// Send a HEAD request to `url` on the shared client.
pub fn head(url: impl Into<String>) -> Result<Response, Error> {
    shared_client().head(url).perform()
}

/// POST `data` to `url` on the shared client.
pub fn post(url: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Response, Error> {
    shared_client().post(url, data).perform()
}

/// PUT `data` to `url` on the shared client.
pub fn put(url: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Response, Error> {
    shared_client().put(url, data).perform()
}

/// Send a DELETE request to `url` on the shared client.
pub fn delete(url: impl Into<String>) -> Result<Response, Error> {
    shared_client().delete(url).perform()
}
