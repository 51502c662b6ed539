//! The HTTP client implementation.

use crate::agent;
use crate::error::Error;
use crate::request::RequestBuilder;
use crate::stats::RequestStats;
use http::Method;
use std::fmt;
use std::sync::Arc;

/// An HTTP client that hands out request builders.
///
/// The client owns the agent thread every one of its requests runs on, plus
/// the statistics sink they all report into. It is expensive to create and
/// cheap to use, so create one and keep it around; dropping it shuts the
/// agent down and aborts any requests still in flight.
pub struct HttpClient {
    agent: agent::Handle,
    stats: Arc<RequestStats>,
}

impl HttpClient {
    /// Create a new client with its own agent thread.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            agent: agent::spawn()?,
            stats: Arc::new(RequestStats::default()),
        })
    }

    /// Start building a request.
    pub fn request(&self) -> RequestBuilder {
        RequestBuilder::new(self.agent.remote(), self.stats.clone())
    }

    /// Start building a GET request for `url`.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request().url(url)
    }

    /// Start building a HEAD request for `url`.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder {
        self.request().method(Method::HEAD).url(url)
    }

    /// Start building a POST of `data` to `url`.
    pub fn post(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> RequestBuilder {
        self.request().post(url, data)
    }

    /// Start building a PUT streaming `data` to `url`.
    pub fn put(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> RequestBuilder {
        self.request().put(url, data)
    }

    /// Start building a PATCH of `data` to `url`.
    pub fn patch(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> RequestBuilder {
        self.request().patch(url, data)
    }

    /// Start building a DELETE request for `url`.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        self.request().method(Method::DELETE).url(url)
    }

    /// The statistics sink all of this client's requests report into.
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("stats", &self.stats)
            .finish()
    }
}
