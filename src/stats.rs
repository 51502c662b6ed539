//! Per-client request statistics.

use crate::error::{Error, ErrorKind};
use crossbeam_utils::atomic::AtomicCell;
use std::fmt;
use std::time::Duration;

/// A sink for request counters and timings, shared by every request a
/// client issues.
///
/// The agent thread posts updates while consumers read concurrently, so all
/// fields are lock-free cells and reads are not guaranteed to be mutually
/// consistent. Every attempt records exactly one of
/// [`finish_ok`](Self::finish_ok) or [`finish_ec`](Self::finish_ec).
#[derive(Default)]
pub struct RequestStats {
    started: AtomicCell<u64>,
    ok: AtomicCell<u64>,
    errors: AtomicCell<u64>,
    last_status: AtomicCell<u16>,
    last_error: AtomicCell<Option<ErrorKind>>,
    time_to_start_us: AtomicCell<u64>,
    timings: AtomicCell<u64>,
}

impl RequestStats {
    /// Record that a request was submitted.
    pub(crate) fn start(&self) {
        self.started.fetch_add(1);
    }

    /// Record one attempt's time to first byte.
    pub(crate) fn store_time_to_start(&self, time: Duration) {
        self.time_to_start_us.fetch_add(time.as_micros() as u64);
        self.timings.fetch_add(1);
    }

    /// Record an attempt that produced a response.
    pub(crate) fn finish_ok(&self, status: u16) {
        self.ok.fetch_add(1);
        self.last_status.store(status);
    }

    /// Record an attempt that failed in transit.
    pub(crate) fn finish_ec(&self, error: &Error) {
        self.errors.fetch_add(1);
        self.last_error.store(Some(error.kind()));
    }

    /// Number of requests submitted.
    pub fn requests_started(&self) -> u64 {
        self.started.load()
    }

    /// Number of attempts that produced a response, across all requests.
    pub fn attempts_ok(&self) -> u64 {
        self.ok.load()
    }

    /// Number of attempts that failed in transit, across all requests.
    pub fn attempts_failed(&self) -> u64 {
        self.errors.load()
    }

    /// Total attempts recorded so far.
    pub fn attempts_total(&self) -> u64 {
        self.ok.load() + self.errors.load()
    }

    /// Status code of the most recently recorded response, if any.
    pub fn last_status(&self) -> Option<u16> {
        match self.last_status.load() {
            0 => None,
            status => Some(status),
        }
    }

    /// Kind of the most recently recorded attempt error, if any.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error.load()
    }

    /// Mean time to first byte over all recorded attempts.
    pub fn average_time_to_start(&self) -> Option<Duration> {
        match self.timings.load() {
            0 => None,
            count => Some(Duration::from_micros(self.time_to_start_us.load() / count)),
        }
    }
}

impl fmt::Debug for RequestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestStats")
            .field("requests_started", &self.requests_started())
            .field("attempts_ok", &self.attempts_ok())
            .field("attempts_failed", &self.attempts_failed())
            .field("last_status", &self.last_status())
            .field("last_error", &self.last_error())
            .field("average_time_to_start", &self.average_time_to_start())
            .finish()
    }
}
