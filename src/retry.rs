//! Retry policy: the finish-or-retry decision, backoff delays, and the
//! aggregate time budget for a whole retry sequence.

use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// Base unit of the exponential backoff window.
pub(crate) const BACKOFF_BASE: Duration = Duration::from_millis(25);

/// Exponent cap for the backoff window.
const BACKOFF_MAX_EXPONENT: u32 = 5;

/// Slack factor applied to the per-attempt timeout when budgeting the whole
/// sequence.
const BUDGET_SLACK: f64 = 1.1;

/// Retry configuration as set on the builder.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, always at least 1.
    pub(crate) attempts: u32,

    /// Whether transport errors are retried, or only `5xx` responses.
    pub(crate) on_transport_failure: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            on_transport_failure: false,
        }
    }
}

impl RetryConfig {
    pub(crate) fn new(attempts: u32, on_transport_failure: bool) -> Self {
        Self {
            attempts: attempts.max(1),
            on_transport_failure,
        }
    }
}

/// Progress of a request through its configured attempts.
#[derive(Debug)]
pub(crate) struct RetryState {
    config: RetryConfig,

    /// Attempts used so far, starting at 1 for the initial submission.
    used: u32,
}

impl RetryState {
    pub(crate) fn new(config: RetryConfig) -> Self {
        Self { config, used: 1 }
    }

    pub(crate) fn attempts_configured(&self) -> u32 {
        self.config.attempts
    }

    pub(crate) fn attempts_used(&self) -> u32 {
        self.used
    }

    /// Record that another attempt is about to be submitted.
    pub(crate) fn advance(&mut self) {
        debug_assert!(self.used < self.config.attempts);
        self.used += 1;
    }
}

/// Outcome of the per-attempt retry decision.
#[derive(Debug)]
pub(crate) enum RetryDecision {
    /// The attempt's result is final; resolve the caller's future with it.
    Finish,

    /// Schedule another attempt after the given delay.
    Retry(Duration),
}

/// Decide whether the attempt that just completed settles the request.
///
/// An attempt is final when its result is acceptable (no transport error and
/// a status below 500), when the attempt budget is exhausted, or when the
/// error is one this request is not configured to retry. The returned delay
/// is drawn fresh for each decision.
pub(crate) fn decide(
    error: Option<&Error>,
    status: Option<u16>,
    state: &RetryState,
) -> RetryDecision {
    if state.used >= state.config.attempts {
        return RetryDecision::Finish;
    }

    let retry_worthy = match error {
        Some(error) => state.config.on_transport_failure && error.is_transport(),
        None => status.map_or(false, |status| status >= 500),
    };

    if retry_worthy {
        RetryDecision::Retry(backoff_delay(state.used))
    } else {
        RetryDecision::Finish
    }
}

/// Backoff before attempt `used + 1`, where `used` is the number of attempts
/// already made (at least 1).
///
/// The delay is `BACKOFF_BASE * (r + 1)` with `r` drawn uniformly from
/// `[0, 2^min(used - 1, 5)]`, so the expected delay grows with each attempt
/// until the window caps out.
pub(crate) fn backoff_delay(used: u32) -> Duration {
    let window = 1u32 << used.saturating_sub(1).min(BACKOFF_MAX_EXPONENT);
    let multiplier = rand::thread_rng().gen_range(0..=window) + 1;

    BACKOFF_BASE * multiplier
}

/// Upper bound on the wall-clock time of a whole retry sequence: every
/// attempt running to its per-attempt timeout (with slack) plus the
/// worst-case backoff between attempts.
pub(crate) fn total_deadline(per_attempt: Duration, attempts: u32) -> Duration {
    let mut millis = per_attempt.as_millis() as f64 * BUDGET_SLACK * f64::from(attempts);

    for used in 1..attempts {
        let window = 1u64 << used.saturating_sub(1).min(BACKOFF_MAX_EXPONENT);
        millis += (BACKOFF_BASE.as_millis() as u64 * (window + 1)) as f64;
    }

    Duration::from_millis(millis.ceil() as u64)
}
