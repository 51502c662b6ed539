//! The state of one request across all of its attempts.
//!
//! A [`TransferState`] is created when a configured request is submitted and
//! lives until the caller's future is resolved. It is shared between the
//! submitting task, the agent thread (via the callback handler and the
//! completion continuations), and any pending retry timer; whoever drops the
//! last reference after terminal resolution releases it.
//!
//! Configuration is frozen at submission. Everything that changes while the
//! request runs (the response under construction, the retry bookkeeping, the
//! PUT cursor, the span) lives behind one mutex, and after submission it is
//! only touched from the agent thread; the caller's side of the promise is
//! the single synchronization point back to the awaiting task.

use crate::agent;
use crate::body::{PutBody, RequestBody};
use crate::curlext::EasyExt;
use crate::error::{Error, ErrorKind};
use crate::handler::{Completion, EasyHandle, RequestHandler};
use crate::parse;
use crate::request::RequestConfig;
use crate::response::{Response, ResponseBuilder};
use crate::retry::{self, RetryDecision, RetryState};
use crate::stats::RequestStats;
use crate::trace::{RequestSpan, SYNTHETIC_TRANSPORT_ERROR_STATUS};
use async_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_REDIRECTS: u32 = 10;

/// Shared state of a single request.
pub(crate) struct TransferState {
    agent: agent::Remote,
    stats: Arc<RequestStats>,
    config: RequestConfig,
    cancelled: AtomicBool,
    promise: Sender<Result<Response, Error>>,
    runtime: Mutex<Runtime>,
}

/// The parts that change while the request runs.
struct Runtime {
    /// Accumulates the current attempt's response. Replaced at the start of
    /// every attempt, so callbacks always find one in place.
    response: Option<ResponseBuilder>,

    retry: RetryState,

    /// The PUT payload, if any, rewound before every attempt.
    put_body: Option<PutBody>,

    /// Present from submission until terminal resolution.
    span: Option<RequestSpan>,

    /// The backoff timer between attempts, used to cut a wait short when
    /// the request is cancelled.
    pending_timer: Option<agent::TimerKey>,
}

/// Submit a configured request for execution, beginning its first attempt.
pub(crate) fn submit(
    mut config: RequestConfig,
    agent: agent::Remote,
    stats: Arc<RequestStats>,
    promise: Sender<Result<Response, Error>>,
) -> Arc<TransferState> {
    stats.start();

    let span = RequestSpan::new(&config.url);
    let retry = RetryState::new(config.retry);

    let put_body = match std::mem::take(&mut config.body) {
        RequestBody::Put(put) => Some(put),
        other => {
            config.body = other;
            None
        }
    };

    let state = Arc::new(TransferState {
        agent,
        stats,
        config,
        cancelled: AtomicBool::new(false),
        promise,
        runtime: Mutex::new(Runtime {
            response: None,
            retry,
            put_body,
            span: Some(span),
            pending_timer: None,
        }),
    });

    // Refuse nonsense before it reaches the engine.
    if let Err(e) = url::Url::parse(&state.config.url) {
        state.fail_fatal(Error::new(ErrorKind::ProtocolViolation, e));
        return state;
    }

    match state.create_transfer() {
        Ok(easy) => {
            state.arm_deadline();
            state.submit_attempt(easy);
        }
        Err(e) => state.fail_fatal(e),
    }

    state
}

impl TransferState {
    pub(crate) fn is_cancelled(&self) -> bool {
        // A dropped future counts too: with nobody left to observe the
        // outcome there is no point finishing the transfer.
        self.cancelled.load(Ordering::SeqCst) || self.promise.is_closed()
    }

    /// Ask the engine to abort whatever this request is doing.
    ///
    /// Idempotent and non-blocking. An in-flight transfer is aborted by the
    /// agent on its next turn; a pending backoff timer is expedited so the
    /// cancellation resolves without waiting out the delay.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!("cancelling request");

        let pending = self.runtime.lock().unwrap().pending_timer;

        if let Some(key) = pending {
            self.agent.expedite(key);
        }

        self.agent.wake();
    }

    fn create_transfer(self: &Arc<Self>) -> Result<EasyHandle, Error> {
        let mut easy = curl::easy::Easy2::new(RequestHandler::new(self.clone()));
        self.configure_handle(&mut easy)?;
        Ok(easy)
    }

    /// Apply the frozen configuration to a fresh easy handle.
    fn configure_handle(&self, easy: &mut EasyHandle) -> Result<(), Error> {
        let config = &self.config;

        easy.verbose(log::log_enabled!(log::Level::Debug))?;

        // Never let the engine install process-wide signal handlers.
        easy.signal(false)?;

        easy.url(&config.url)?;
        easy.custom_request(config.method.as_str())?;

        if config.method == http::Method::HEAD {
            easy.nobody(true)?;
        }

        if config.timeout_ms > 0 {
            // The per-attempt budget bounds both the connect phase and the
            // whole transfer.
            let timeout = Duration::from_millis(config.timeout_ms);
            easy.timeout(timeout)?;
            easy.connect_timeout(timeout)?;
        }

        // Location following and POST replay are deliberately one knob.
        easy.follow_location(config.follow_redirects)?;
        if config.follow_redirects {
            easy.max_redirections(MAX_REDIRECTS)?;
        }
        easy.post_redirect_replay(config.follow_redirects)?;

        easy.ssl_verify_peer(config.verify)?;
        easy.ssl_verify_host(config.verify)?;

        if let Some(path) = config.ca_info.as_deref() {
            easy.cainfo(path)?;
        }

        if let Some(path) = config.ca_path.as_deref() {
            easy.capath(path)?;
        }

        if let Some(path) = config.crl_file.as_deref() {
            easy.crl_file(path)?;
        }

        if let Some(version) = config.http_version {
            easy.http_version(if version == http::Version::HTTP_10 {
                curl::easy::HttpVersion::V10
            } else if version == http::Version::HTTP_11 {
                curl::easy::HttpVersion::V11
            } else if version == http::Version::HTTP_2 {
                curl::easy::HttpVersion::V2
            } else {
                curl::easy::HttpVersion::Any
            })?;
        }

        easy.useragent(&config.user_agent)?;

        // The engine decodes these transparently before our write callback.
        easy.accept_encoding("gzip,deflate")?;

        let mut headers = curl::easy::List::new();

        for (name, value) in &config.headers {
            headers.append(&format_header(name, value))?;
        }

        let put_len = {
            let runtime = self.runtime.lock().unwrap();

            if let Some(span) = runtime.span.as_ref() {
                for (name, value) in span.propagation_headers() {
                    headers.append(&format_header(name, value))?;
                }
            }

            runtime.put_body.as_ref().map(PutBody::len)
        };

        easy.http_headers(headers)?;

        if let RequestBody::Buffer(data) = &config.body {
            easy.post(true)?;
            easy.post_fields_copy(data)?;
        }

        if let Some(len) = put_len {
            easy.upload(true)?;
            easy.in_filesize(len)?;
        }

        if let Some(form) = config.form.as_ref() {
            easy.httppost(form.to_curl()?)?;
        }

        Ok(())
    }

    /// Begin one attempt: install a fresh response, rewind the PUT cursor,
    /// pick the completion continuation, and hand the transfer to the agent.
    fn submit_attempt(self: &Arc<Self>, mut easy: EasyHandle) {
        {
            let mut runtime = self.runtime.lock().unwrap();

            runtime.response = Some(ResponseBuilder::new());
            runtime.pending_timer = None;

            if let Some(put) = runtime.put_body.as_mut() {
                put.rewind();
            }

            if let Some(span) = runtime.span.as_ref() {
                let _enter = span.span().enter();
                tracing::debug!(
                    attempt = runtime.retry.attempts_used(),
                    of = runtime.retry.attempts_configured(),
                    "submitting attempt"
                );
            }
        }

        easy.get_mut().set_completion(self.attempt_completion());

        if let Err(e) = self.agent.execute(easy) {
            self.fail_fatal(e);
        }
    }

    /// The continuation the agent invokes when the attempt finishes:
    /// straight to terminal resolution for single-attempt requests, through
    /// the retry decision otherwise.
    fn attempt_completion(self: &Arc<Self>) -> Completion {
        let state = self.clone();

        if self.config.retry.attempts > 1 {
            Box::new(move |easy, result| state.on_attempt_complete(easy, result))
        } else {
            Box::new(move |easy, result| state.finish(easy, result))
        }
    }

    /// Runs on the agent thread after each attempt of a retrying request.
    fn on_attempt_complete(self: &Arc<Self>, mut easy: EasyHandle, result: Result<(), Error>) {
        if self.is_cancelled() {
            return self.finish(easy, Err(Error::from_kind(ErrorKind::Cancelled)));
        }

        let status = response_code(&mut easy);

        let decision = {
            let runtime = self.runtime.lock().unwrap();
            retry::decide(result.as_ref().err(), status, &runtime.retry)
        };

        match decision {
            RetryDecision::Finish => self.finish(easy, result),
            RetryDecision::Retry(delay) => self.schedule_retry(easy, result, status, delay),
        }
    }

    /// Record the failed attempt and arm the backoff timer for the next one.
    fn schedule_retry(
        self: &Arc<Self>,
        mut easy: EasyHandle,
        result: Result<(), Error>,
        status: Option<u16>,
        delay: Duration,
    ) {
        if let Some(time) = easy.time_to_first_byte() {
            self.stats.store_time_to_start(time);
        }

        match &result {
            Ok(()) => self.stats.finish_ok(status.unwrap_or(0)),
            Err(e) => self.stats.finish_ec(e),
        }

        {
            let mut runtime = self.runtime.lock().unwrap();
            runtime.retry.advance();

            if let Some(span) = runtime.span.as_ref() {
                let _enter = span.span().enter();
                tracing::debug!(?status, ?delay, "attempt failed, backing off");
            }
        }

        let timer = {
            let state = self.clone();
            self.agent
                .singleshot(delay, Box::new(move || state.on_backoff_elapsed(easy)))
        };

        match timer {
            Ok(key) => {
                self.runtime.lock().unwrap().pending_timer = Some(key);

                // A cancel may have slipped in while the timer was not yet
                // registered; make sure it does not wait out the backoff.
                if self.is_cancelled() {
                    self.agent.expedite(key);
                }
            }
            Err(e) => self.fail_fatal(e),
        }
    }

    /// Runs on the agent thread when the backoff timer fires.
    fn on_backoff_elapsed(self: Arc<Self>, easy: EasyHandle) {
        self.runtime.lock().unwrap().pending_timer = None;

        if self.is_cancelled() {
            return self.finish(easy, Err(Error::from_kind(ErrorKind::Cancelled)));
        }

        self.submit_attempt(easy);
    }

    /// Terminal resolution: record the final attempt, tag and release the
    /// span, and resolve the caller's future.
    fn finish(&self, mut easy: EasyHandle, result: Result<(), Error>) {
        let status = response_code(&mut easy);
        let effective_url = easy.effective_url().ok().flatten().map(str::to_owned);

        if let Some(time) = easy.time_to_first_byte() {
            self.stats.store_time_to_start(time);
        }

        let outcome = match result {
            Ok(()) => {
                self.stats.finish_ok(status.unwrap_or(0));

                let builder = self
                    .runtime
                    .lock()
                    .unwrap()
                    .response
                    .take()
                    .unwrap_or_default();

                Ok(builder.finish(status, effective_url))
            }
            Err(e) => {
                self.stats.finish_ec(&e);
                Err(e)
            }
        };

        self.resolve(outcome, status);

        // The easy handle drops here, after the last callback that could
        // reference it has returned.
    }

    /// Resolve the future without a transfer in hand, e.g. when the handle
    /// could not be configured or a timer could not be scheduled.
    fn fail_fatal(&self, error: Error) {
        self.stats.finish_ec(&error);
        self.resolve(Err(error), None);
    }

    fn resolve(&self, outcome: Result<Response, Error>, status: Option<u16>) {
        let span = self.runtime.lock().unwrap().span.take();

        if let Some(mut span) = span {
            match &outcome {
                Ok(response) => {
                    span.set_status(response.status());

                    if !(200..400).contains(&response.status()) {
                        span.set_error();
                    }
                }
                Err(_) => {
                    span.set_status(status.unwrap_or(SYNTHETIC_TRANSPORT_ERROR_STATUS));
                    span.set_error();
                }
            }

            span.finish();
        }

        // First resolution wins; a result arriving after the aggregate
        // deadline already fired is discarded here.
        drop(self.promise.try_send(outcome));
    }

    /// Bound the whole retry sequence, including worst-case backoff, when a
    /// per-attempt timeout is configured.
    fn arm_deadline(&self) {
        if self.config.timeout_ms == 0 {
            return;
        }

        let deadline = retry::total_deadline(
            Duration::from_millis(self.config.timeout_ms),
            self.config.retry.attempts,
        );

        let promise = self.promise.clone();

        let armed = self.agent.singleshot(
            deadline,
            Box::new(move || {
                drop(promise.try_send(Err(Error::with_message(
                    ErrorKind::Timeout,
                    "time budget for all attempts elapsed",
                ))));
            }),
        );

        if let Err(e) = armed {
            tracing::warn!("failed to arm the aggregate deadline: {}", e);
        }
    }

    // Callback-facing entry points, invoked from the handler on the agent
    // thread.

    /// Route one raw header line into the current attempt's response.
    pub(crate) fn on_header_line(&self, line: &[u8]) {
        let mut runtime = self.runtime.lock().unwrap();
        let runtime = &mut *runtime;

        let _enter = runtime.span.as_ref().map(|span| span.span().enter());

        let response = match runtime.response.as_mut() {
            Some(response) => response,
            None => {
                debug_assert!(false, "header callback with no response in place");
                return;
            }
        };

        if let Some(status) = parse::parse_status_line(line) {
            tracing::trace!(status, "received status line");
            response.start_message(status);
        } else if let Some((name, value)) = parse::parse_header_line(line) {
            response.insert_header(name, value);
        }
    }

    /// Feed the next chunk of the PUT payload to the engine.
    pub(crate) fn read_put_body(&self, out: &mut [u8]) -> usize {
        let mut runtime = self.runtime.lock().unwrap();

        match runtime.put_body.as_mut() {
            Some(put) => put.read(out),
            None => 0,
        }
    }

    /// Rewind the PUT payload, if there is one to rewind.
    pub(crate) fn rewind_put_body(&self) -> bool {
        let mut runtime = self.runtime.lock().unwrap();

        match runtime.put_body.as_mut() {
            Some(put) => {
                put.rewind();
                true
            }
            None => false,
        }
    }

    /// Append received response body bytes to the current attempt.
    pub(crate) fn append_body(&self, data: &[u8]) {
        let mut runtime = self.runtime.lock().unwrap();

        if let Some(response) = runtime.response.as_mut() {
            response.append_body(data);
        }
    }
}

fn response_code(easy: &mut EasyHandle) -> Option<u16> {
    match easy.response_code() {
        Ok(0) | Err(_) => None,
        Ok(code) => Some(code as u16),
    }
}

fn format_header(name: &str, value: &str) -> String {
    // curl needs a special syntax for explicitly empty header values.
    if value.trim().is_empty() {
        format!("{};", name)
    } else {
        format!("{}: {}", name, value)
    }
}
