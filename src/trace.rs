//! Per-request tracing spans and propagation headers.

use rand::Rng;
use tracing::field::Empty;
use tracing::Span;

pub(crate) const SPAN_ID_HEADER: &str = "X-YaSpanId";
pub(crate) const TRACE_ID_HEADER: &str = "X-YaTraceId";
pub(crate) const REQUEST_ID_HEADER: &str = "X-YaRequestId";

/// Synthetic status recorded when a transfer fails before producing any
/// response.
pub(crate) const SYNTHETIC_TRANSPORT_ERROR_STATUS: u16 = 599;

/// A span covering all attempts of a single request.
///
/// The span is created detached from whatever span is current on the calling
/// task (linked with `follows_from` instead), since the request outlives the
/// awaiter's stack: callbacks run on the agent thread and the final
/// resolution may happen after the caller stopped polling. It is finished
/// exactly once, when the request reaches a terminal state.
#[derive(Debug)]
pub(crate) struct RequestSpan {
    span: Span,
    span_id: String,
    trace_id: String,
    request_id: String,
    status: Option<u16>,
    error: bool,
}

impl RequestSpan {
    pub(crate) fn new(url: &str) -> Self {
        let mut rng = rand::thread_rng();

        let span_id = format!("{:016x}", rng.gen::<u64>());
        let trace_id = format!("{:032x}", rng.gen::<u128>());
        let request_id = format!("{:016x}", rng.gen::<u64>());

        let span = tracing::debug_span!(
            parent: None,
            "external_request",
            span_id = %span_id,
            trace_id = %trace_id,
            request_id = %request_id,
            http.url = %url,
            http.status_code = Empty,
            error = Empty,
        );
        span.follows_from(Span::current());

        Self {
            span,
            span_id,
            trace_id,
            request_id,
            status: None,
            error: false,
        }
    }

    /// The span this request's events are grouped under.
    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Headers carrying this span's identity to the server.
    pub(crate) fn propagation_headers(&self) -> [(&'static str, &str); 3] {
        [
            (SPAN_ID_HEADER, self.span_id.as_str()),
            (TRACE_ID_HEADER, self.trace_id.as_str()),
            (REQUEST_ID_HEADER, self.request_id.as_str()),
        ]
    }

    pub(crate) fn set_status(&mut self, status: u16) {
        self.status = Some(status);
        self.span.record("http.status_code", u64::from(status));
    }

    pub(crate) fn set_error(&mut self) {
        self.error = true;
        self.span.record("error", true);
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> Option<u16> {
        self.status
    }

    #[cfg(test)]
    pub(crate) fn is_error(&self) -> bool {
        self.error
    }

    /// Close out the span at terminal resolution.
    pub(crate) fn finish(self) {
        let _enter = self.span.enter();

        tracing::debug!(
            status = ?self.status,
            error = self.error,
            "request finished"
        );
    }
}
