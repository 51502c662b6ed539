//! The fluent request surface: configuration accumulation, submission, and
//! the future the caller awaits.

use crate::agent;
use crate::body::{PutBody, RequestBody};
use crate::error::{Error, ErrorKind};
use crate::form::Form;
use crate::response::Response;
use crate::retry::RetryConfig;
use crate::stats::RequestStats;
use crate::transfer::{self, TransferState};
use async_channel::Receiver;
use http::{Method, Version};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub(crate) const USER_AGENT: &str = concat!("recurl/", env!("CARGO_PKG_VERSION"));

/// A request's configuration, accumulated by the builder and frozen once
/// the request is submitted.
#[derive(Debug)]
pub(crate) struct RequestConfig {
    pub(crate) url: String,
    pub(crate) method: Method,

    /// Per-attempt timeout in milliseconds; `0` leaves the engine default.
    pub(crate) timeout_ms: u64,

    pub(crate) follow_redirects: bool,
    pub(crate) verify: bool,
    pub(crate) ca_info: Option<PathBuf>,
    pub(crate) ca_path: Option<PathBuf>,
    pub(crate) crl_file: Option<PathBuf>,
    pub(crate) http_version: Option<Version>,
    pub(crate) retry: RetryConfig,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: RequestBody,
    pub(crate) form: Option<Form>,
    pub(crate) user_agent: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: Method::GET,
            timeout_ms: 0,
            follow_redirects: true,
            verify: true,
            ca_info: None,
            ca_path: None,
            crl_file: None,
            http_version: None,
            retry: RetryConfig::default(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            form: None,
            user_agent: USER_AGENT.to_owned(),
        }
    }
}

/// Builds up a request through chained configuration calls, then executes
/// it with [`perform`](Self::perform) or
/// [`async_perform`](Self::async_perform).
///
/// Builders come from [`HttpClient`](crate::HttpClient); each one describes
/// a single request. Every option has a sensible default: redirects are
/// followed (up to 10 hops, replaying POST bodies), TLS peers are verified,
/// and a request is attempted exactly once unless
/// [`retry`](Self::retry) says otherwise.
#[derive(Debug)]
pub struct RequestBuilder {
    agent: agent::Remote,
    stats: Arc<RequestStats>,
    config: RequestConfig,
}

impl RequestBuilder {
    pub(crate) fn new(agent: agent::Remote, stats: Arc<RequestStats>) -> Self {
        Self {
            agent,
            stats,
            config: RequestConfig::default(),
        }
    }

    /// Set the URL to request.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.config.method = method;
        self
    }

    /// Set the per-attempt timeout in milliseconds, bounding both the
    /// connect phase and the whole transfer. `0` keeps the engine default.
    pub fn timeout(mut self, millis: u64) -> Self {
        self.config.timeout_ms = millis;
        self
    }

    /// Follow `Location` redirects, up to 10 hops. Also controls whether
    /// POST bodies are replayed across redirects. Enabled by default.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Verify the TLS peer certificate and host name. Enabled by default.
    pub fn verify(mut self, enable: bool) -> Self {
        self.config.verify = enable;
        self
    }

    /// Use a PEM bundle at the given path for peer verification.
    pub fn ca_info(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_info = Some(path.into());
        self
    }

    /// Use a directory of trusted certificates for peer verification.
    pub fn ca_file(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.ca_path = Some(dir.into());
        self
    }

    /// Check peers against a certificate revocation list.
    pub fn crl_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.crl_file = Some(path.into());
        self
    }

    /// Prefer a particular HTTP version when negotiating with the server.
    pub fn http_version(mut self, version: Version) -> Self {
        self.config.http_version = Some(version);
        self
    }

    /// Allow up to `attempts` attempts (clamped to at least 1). Responses
    /// with status 500 and above are always retried while attempts remain;
    /// `on_transport_failure` additionally retries transport errors.
    pub fn retry(mut self, attempts: u32, on_transport_failure: bool) -> Self {
        self.config.retry = RetryConfig::new(attempts, on_transport_failure);
        self
    }

    /// Send a multipart form as a POST body.
    pub fn form(mut self, form: Form) -> Self {
        self.config.method = Method::POST;
        self.config.form = Some(form);
        self
    }

    /// Add request headers. Order is not significant.
    pub fn headers<N, V>(mut self, headers: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.config
            .headers
            .extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    /// Add a single request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.push((name.into(), value.into()));
        self
    }

    /// Override the default `User-Agent` header.
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.config.user_agent = value.into();
        self
    }

    /// Configure a POST of `data` to `url` in one step.
    pub fn post(mut self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.config.method = Method::POST;
        self.config.url = url.into();
        self.config.body = RequestBody::Buffer(data.into());
        self
    }

    /// Configure a PATCH of `data` to `url` in one step.
    pub fn patch(mut self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.config.method = Method::PATCH;
        self.config.url = url.into();
        self.config.body = RequestBody::Buffer(data.into());
        self
    }

    /// Configure a PUT to `url`, streaming `data` as the request body.
    pub fn put(mut self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.config.method = Method::PUT;
        self.config.url = url.into();
        self.config.body = RequestBody::Put(PutBody::new(data));
        self
    }

    /// Submit the request and return a future resolving to its outcome.
    ///
    /// Submission happens immediately; the transfer makes progress whether
    /// or not the future is being polled. The future resolves exactly once:
    /// with a [`Response`] (any status code, including `4xx`/`5xx`), or
    /// with an [`Error`] for transport failures, timeouts or cancellation.
    pub fn async_perform(self) -> ResponseFuture {
        let (promise, receiver) = async_channel::bounded(1);

        let state = transfer::submit(self.config, self.agent, self.stats, promise);

        ResponseFuture::new(receiver, RequestHandle { state })
    }

    /// Submit the request and block until it resolves.
    pub fn perform(self) -> Result<Response, Error> {
        futures_lite::future::block_on(self.async_perform())
    }
}

/// A cheap, cloneable handle to an in-flight request.
#[derive(Clone)]
pub struct RequestHandle {
    state: Arc<TransferState>,
}

impl RequestHandle {
    /// Cancel the request.
    ///
    /// Non-blocking and idempotent. The future resolves with a
    /// cancellation error shortly after, whether the request was mid
    /// transfer or waiting between attempts; if it already resolved, this
    /// does nothing.
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestHandle")
    }
}

/// A future resolving to the outcome of a submitted request.
pub struct ResponseFuture {
    inner: Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'static>>,
    handle: RequestHandle,
}

impl ResponseFuture {
    fn new(receiver: Receiver<Result<Response, Error>>, handle: RequestHandle) -> Self {
        let inner = Box::pin(async move {
            receiver.recv().await.unwrap_or_else(|_| {
                Err(Error::with_message(
                    ErrorKind::Aborted,
                    "request dropped before producing a result",
                ))
            })
        });

        Self { inner, handle }
    }

    /// Get a handle for cancelling this request.
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseFuture")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_redirects_verify_and_try_once() {
        let config = RequestConfig::default();

        assert!(config.follow_redirects);
        assert!(config.verify);
        assert_eq!(config.retry.attempts, 1);
        assert!(!config.retry.on_transport_failure);
        assert_eq!(config.timeout_ms, 0);
        assert_eq!(config.method, Method::GET);
        assert!(matches!(config.body, RequestBody::Empty));
    }

    #[test]
    fn default_user_agent_carries_the_crate_version() {
        assert!(RequestConfig::default()
            .user_agent
            .starts_with("recurl/"));
    }

    static_assertions::assert_impl_all!(ResponseFuture: Send);
    static_assertions::assert_impl_all!(RequestHandle: Send, Sync, Clone);
}
