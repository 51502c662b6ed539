//! A loopback socket pair that can wake up the agent while it is waiting on
//! the multi handle.
//!
//! The receiving end is added to the multi wait set, so a single datagram
//! interrupts the wait. An atomic flag deduplicates notifications between
//! drains to keep the socket from filling up under bursts.

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) fn pair() -> io::Result<(NotifySender, NotifyReceiver)> {
    let rx = UdpSocket::bind("127.0.0.1:0")?;
    rx.set_nonblocking(true)?;

    let tx = UdpSocket::bind("127.0.0.1:0")?;
    tx.set_nonblocking(true)?;
    tx.connect(rx.local_addr()?)?;

    let notified = Arc::<AtomicBool>::default();

    Ok((
        NotifySender {
            socket: tx,
            notified: notified.clone(),
        },
        NotifyReceiver {
            socket: rx,
            notified,
        },
    ))
}

#[derive(Debug)]
pub(crate) struct NotifySender {
    socket: UdpSocket,
    notified: Arc<AtomicBool>,
}

impl NotifySender {
    pub(crate) fn notify(&self) {
        if !self.notified.swap(true, Ordering::SeqCst) {
            // Failure means the agent is either gone or already has a
            // datagram queued; both are fine to ignore.
            drop(self.socket.send(&[1]));
        }
    }
}

#[derive(Debug)]
pub(crate) struct NotifyReceiver {
    socket: UdpSocket,
    notified: Arc<AtomicBool>,
}

impl NotifyReceiver {
    pub(crate) fn drain(&self) -> bool {
        if !self.notified.swap(false, Ordering::SeqCst) {
            return false;
        }

        while self.socket.recv(&mut [0; 32]).is_ok() {}

        true
    }

    #[cfg(unix)]
    pub(crate) fn as_wait_fd(&self) -> curl::multi::WaitFd {
        use std::os::unix::io::AsRawFd;

        let mut fd = curl::multi::WaitFd::new();
        fd.set_fd(self.socket.as_raw_fd());

        fd
    }

    #[cfg(windows)]
    pub(crate) fn as_wait_fd(&self) -> curl::multi::WaitFd {
        use std::os::windows::io::AsRawSocket;

        let mut fd = curl::multi::WaitFd::new();
        fd.set_fd(self.socket.as_raw_socket() as curl::multi::Socket);

        fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_deduplicate_until_drained() {
        let (tx, rx) = pair().unwrap();

        assert!(!rx.drain());

        tx.notify();
        tx.notify();

        assert!(rx.drain());
        assert!(!rx.drain());

        tx.notify();
        assert!(rx.drain());
    }
}
