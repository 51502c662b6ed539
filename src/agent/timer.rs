//! Single-shot timers fired on the agent thread.

use std::time::{Duration, Instant};

pub(crate) type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer so it can be expedited later.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TimerKey(pub(crate) usize);

struct Entry {
    key: TimerKey,
    expires: Instant,
    callback: TimerCallback,
}

/// A queue of pending single-shot timers.
///
/// The number of live timers is tied to the number of requests waiting
/// between attempts, so a linear scan is plenty.
#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: Vec<Entry>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn arm(&mut self, key: TimerKey, delay: Duration, callback: TimerCallback) {
        self.entries.push(Entry {
            key,
            expires: Instant::now() + delay,
            callback,
        });
    }

    /// Re-arm a pending timer to fire on the next turn of the agent loop.
    /// Unknown keys (already fired or never armed) are ignored.
    pub(crate) fn expedite(&mut self, key: TimerKey) {
        let now = Instant::now();

        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.key == key) {
            entry.expires = now;
        }
    }

    /// Remove and return the callback of one expired timer, if any.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<TimerCallback> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.expires <= now)?;

        Some(self.entries.swap_remove(index).callback)
    }

    /// Time until the nearest timer expires, `None` when the queue is empty.
    pub(crate) fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|entry| entry.expires.saturating_duration_since(now))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_timers_pop_in_any_order() {
        let mut queue = TimerQueue::new();
        queue.arm(TimerKey(1), Duration::ZERO, Box::new(|| {}));
        queue.arm(TimerKey(2), Duration::from_secs(60), Box::new(|| {}));

        let now = Instant::now();

        assert!(queue.pop_expired(now).is_some());
        assert!(queue.pop_expired(now).is_none());
        assert!(!queue.is_empty());
    }

    #[test]
    fn expedite_makes_a_timer_due_immediately() {
        let mut queue = TimerQueue::new();
        queue.arm(TimerKey(7), Duration::from_secs(60), Box::new(|| {}));

        assert!(queue.pop_expired(Instant::now()).is_none());

        queue.expedite(TimerKey(7));

        assert!(queue.pop_expired(Instant::now()).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn expediting_an_unknown_key_is_a_no_op() {
        let mut queue = TimerQueue::new();
        queue.expedite(TimerKey(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn time_remaining_tracks_the_nearest_deadline() {
        let mut queue = TimerQueue::new();

        assert_eq!(queue.time_remaining(Instant::now()), None);

        queue.arm(TimerKey(1), Duration::from_secs(60), Box::new(|| {}));
        queue.arm(TimerKey(2), Duration::from_millis(5), Box::new(|| {}));

        let remaining = queue.time_remaining(Instant::now()).unwrap();
        assert!(remaining <= Duration::from_millis(5));
    }
}
