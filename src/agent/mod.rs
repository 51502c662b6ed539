//! Curl agent that executes multiple requests simultaneously.
//!
//! The agent is a single background thread driving a curl "multi" handle.
//! It is the reactor of the crate: every transfer runs on it, every header
//! and body callback is invoked on it, every completion continuation and
//! retry timer fires on it. Other threads only talk to it through message
//! passing via a [`Remote`], plus a loopback notify socket that interrupts
//! the multi wait.

use crate::error::{Error, ErrorKind};
use crate::handler::{EasyHandle, RequestHandler};
use async_channel::{Receiver, Sender, TryRecvError};
use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::sync::WaitGroup;
use curl::multi::Multi;
use futures_lite::future::block_on;
use slab::Slab;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use self::notify::{NotifyReceiver, NotifySender};
use self::timer::TimerQueue;
pub(crate) use self::timer::{TimerCallback, TimerKey};

mod notify;
mod timer;

static NEXT_AGENT_ID: AtomicCell<usize> = AtomicCell::new(0);

/// Used when curl has no opinion on how long to wait.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Spawn an agent thread and return a handle for communicating with it.
pub(crate) fn spawn() -> Result<Handle, Error> {
    let create_start = Instant::now();

    // Initialize libcurl on the current thread if necessary, in the hope
    // that this is the main thread; some targets require it.
    curl::init();

    let id = NEXT_AGENT_ID.fetch_add(1);
    let (message_tx, message_rx) = async_channel::unbounded();
    let (notify_tx, notify_rx) = notify::pair()?;
    let terminated = Arc::new(AtomicBool::new(false));

    let wait_group = WaitGroup::new();
    let wait_group_thread = wait_group.clone();

    // The agent thread's span outlives this call but was caused by it.
    let agent_span = tracing::debug_span!(parent: None, "agent_thread", id);
    agent_span.follows_from(tracing::Span::current());

    let terminated_thread = terminated.clone();

    let thread_main = move || {
        let _enter = agent_span.enter();

        let agent = Agent {
            multi: Multi::new(),
            message_rx,
            notify_rx,
            requests: Slab::new(),
            timers: TimerQueue::new(),
            close_requested: false,
            terminated: terminated_thread,
        };

        drop(wait_group_thread);

        tracing::debug!("agent took {:?} to start up", create_start.elapsed());

        if let Err(e) = agent.run() {
            tracing::error!("agent shut down with error: {}", e);
        }
    };

    let join_handle = thread::Builder::new()
        .name(format!("recurl-agent-{}", id))
        .spawn(thread_main)?;

    // Block until the agent thread is ready to receive work.
    wait_group.wait();

    Ok(Handle {
        remote: Remote {
            message_tx,
            notify: Arc::new(notify_tx),
            terminated,
            next_timer_key: Arc::new(AtomicUsize::new(0)),
        },
        join_handle: Mutex::new(Some(join_handle)),
    })
}

/// Owning handle to an agent thread.
///
/// Dropping the handle shuts the agent down, aborting any transfers still
/// in flight.
#[derive(Debug)]
pub(crate) struct Handle {
    remote: Remote,
    join_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Handle {
    /// Get a lightweight sender that requests and timers hold on to.
    ///
    /// Remotes do not keep the agent alive and never join the thread, so
    /// they are safe to drop from the agent thread itself.
    pub(crate) fn remote(&self) -> Remote {
        self.remote.clone()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.remote.send(Message::Close).is_err() {
            tracing::warn!("agent thread was already terminated");
        }

        if let Ok(mut guard) = self.join_handle.lock() {
            if let Some(join_handle) = guard.take() {
                if join_handle.join().is_err() {
                    tracing::error!("agent thread panicked");
                }
            }
        }
    }
}

/// Cloneable channel to an agent thread.
#[derive(Clone)]
pub(crate) struct Remote {
    message_tx: Sender<Message>,
    notify: Arc<NotifySender>,
    terminated: Arc<AtomicBool>,
    next_timer_key: Arc<AtomicUsize>,
}

impl Remote {
    /// Begin executing a transfer on the agent.
    pub(crate) fn execute(&self, easy: EasyHandle) -> Result<(), Error> {
        self.send(Message::Execute(easy))
    }

    /// Schedule a callback to run on the agent thread after `delay`.
    pub(crate) fn singleshot(
        &self,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<TimerKey, Error> {
        let key = TimerKey(self.next_timer_key.fetch_add(1, Ordering::Relaxed));

        self.send(Message::StartTimer {
            key,
            delay,
            callback,
        })?;

        Ok(key)
    }

    /// Ask a pending timer to fire on the next turn of the agent loop.
    pub(crate) fn expedite(&self, key: TimerKey) {
        drop(self.send(Message::ExpediteTimer(key)));
    }

    /// Wake the agent thread so it re-examines its requests.
    pub(crate) fn wake(&self) {
        self.notify.notify();
    }

    fn send(&self, message: Message) -> Result<(), Error> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(Error::with_message(
                ErrorKind::Aborted,
                "agent thread terminated",
            ));
        }

        self.message_tx.try_send(message).map_err(|_| {
            Error::with_message(ErrorKind::Aborted, "agent thread disconnected")
        })?;

        self.notify.notify();

        Ok(())
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Remote")
    }
}

/// A message sent from other threads to the agent thread.
enum Message {
    /// Requests the agent to close.
    Close,

    /// Begin executing a new transfer.
    Execute(EasyHandle),

    /// Arm a single-shot timer.
    StartTimer {
        key: TimerKey,
        delay: Duration,
        callback: TimerCallback,
    },

    /// Re-arm a pending timer to fire immediately.
    ExpediteTimer(TimerKey),
}

/// Internal state of an agent thread.
struct Agent {
    /// A curl multi handle, of course.
    multi: Multi,

    /// Incoming messages from remotes.
    message_rx: Receiver<Message>,

    /// Used to wake up the thread while it is waiting on the multi handle.
    notify_rx: NotifyReceiver,

    /// Contains all of the transfers currently registered with curl.
    requests: Slab<curl::multi::Easy2Handle<RequestHandler>>,

    /// Pending single-shot timers.
    timers: TimerQueue,

    /// Indicates if the thread has been requested to stop.
    close_requested: bool,

    /// Flipped on exit so remotes stop queueing work.
    terminated: Arc<AtomicBool>,
}

impl Agent {
    /// Run the agent in the current thread until requested to stop.
    fn run(mut self) -> Result<(), Error> {
        let mut wait_fds = [self.notify_rx.as_wait_fd()];
        wait_fds[0].poll_on_read(true);

        tracing::debug!("agent ready");

        loop {
            self.poll_messages();

            if self.close_requested {
                break;
            }

            self.fire_expired_timers();
            self.sweep_cancelled();

            // Perform any pending reads or writes and handle state changes.
            self.dispatch()?;

            let timeout = self.wait_timeout()?;

            if timeout > Duration::ZERO {
                tracing::trace!("waiting with timeout of {:?}", timeout);
                self.multi.wait(&mut wait_fds, timeout)?;
            }

            self.notify_rx.drain();
        }

        tracing::debug!("agent shutting down");

        self.requests.clear();

        Ok(())
    }

    /// Poll for new messages from remotes.
    ///
    /// If the agent has nothing to do right now, this blocks until a message
    /// arrives.
    fn poll_messages(&mut self) {
        while !self.close_requested {
            if self.requests.is_empty() && self.timers.is_empty() {
                match block_on(self.message_rx.recv()) {
                    Ok(message) => self.handle_message(message),
                    Err(_) => {
                        tracing::warn!("all remotes disconnected without a close message");
                        self.close_requested = true;
                        break;
                    }
                }
            } else {
                match self.message_rx.try_recv() {
                    Ok(message) => self.handle_message(message),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        tracing::warn!("all remotes disconnected without a close message");
                        self.close_requested = true;
                        break;
                    }
                }
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Close => {
                tracing::trace!("agent close requested");
                self.close_requested = true;
            }
            Message::Execute(easy) => self.begin_transfer(easy),
            Message::StartTimer {
                key,
                delay,
                callback,
            } => self.timers.arm(key, delay, callback),
            Message::ExpediteTimer(key) => self.timers.expedite(key),
        }
    }

    fn begin_transfer(&mut self, easy: EasyHandle) {
        match self.multi.add2(easy) {
            Ok(mut handle) => {
                let entry = self.requests.vacant_entry();

                if let Err(e) = handle.set_token(entry.key()) {
                    // The transfer never starts; dropping the handle drops
                    // the promise, which surfaces as an aborted request.
                    tracing::error!("failed to assign token to transfer: {}", e);
                    drop(self.multi.remove2(handle));
                    return;
                }

                entry.insert(handle);
            }
            Err(e) => {
                tracing::error!("failed to register transfer with the multi handle: {}", e);
            }
        }
    }

    /// Run callbacks for every timer whose deadline has passed.
    ///
    /// Callbacks run on this thread and may queue new messages, such as
    /// resubmitting a transfer for its next attempt.
    fn fire_expired_timers(&mut self) {
        let now = Instant::now();

        while let Some(callback) = self.timers.pop_expired(now) {
            callback();
        }
    }

    /// Complete transfers whose requests have been cancelled since the last
    /// turn of the loop.
    fn sweep_cancelled(&mut self) {
        let cancelled: Vec<usize> = self
            .requests
            .iter()
            .filter(|(_, handle)| handle.get_ref().is_cancelled())
            .map(|(token, _)| token)
            .collect();

        for token in cancelled {
            tracing::debug!(token, "aborting cancelled transfer");
            self.finish_transfer(token, Err(Error::from_kind(ErrorKind::Cancelled)));
        }
    }

    fn dispatch(&mut self) -> Result<(), Error> {
        self.multi.perform()?;

        let mut completed = Vec::new();

        self.multi.messages(|message| {
            if let Some(result) = message.result() {
                if let Ok(token) = message.token() {
                    completed.push((token, result));
                }
            }
        });

        for (token, result) in completed {
            self.finish_transfer(token, result.map_err(Error::from));
        }

        Ok(())
    }

    /// Deregister a transfer and hand the easy handle, together with the
    /// attempt's result, to the continuation the request installed.
    fn finish_transfer(&mut self, token: usize, result: Result<(), Error>) {
        if !self.requests.contains(token) {
            tracing::warn!("unknown transfer token: {}", token);
            return;
        }

        let handle = self.requests.remove(token);

        match self.multi.remove2(handle) {
            Ok(mut easy) => {
                let result = if easy.get_ref().is_cancelled() {
                    Err(Error::from_kind(ErrorKind::Cancelled))
                } else {
                    result
                };

                tracing::trace!(token, ok = result.is_ok(), "transfer finished");

                if let Some(complete) = easy.get_mut().take_completion() {
                    complete(easy, result);
                }
            }
            Err(e) => {
                tracing::error!("failed to deregister transfer: {}", e);
            }
        }
    }

    /// How long the next multi wait may block: bounded by curl's own
    /// timeout, the nearest pending timer, and a fixed cap.
    fn wait_timeout(&mut self) -> Result<Duration, Error> {
        let mut timeout = self
            .multi
            .get_timeout()?
            .unwrap_or(DEFAULT_WAIT_TIMEOUT)
            .min(MAX_WAIT_TIMEOUT);

        if let Some(remaining) = self.timers.time_remaining(Instant::now()) {
            timeout = timeout.min(remaining);
        }

        Ok(timeout)
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(Handle: Send, Sync);
    static_assertions::assert_impl_all!(Remote: Send, Sync);
    static_assertions::assert_impl_all!(Message: Send);
}
