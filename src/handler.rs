//! The per-transfer callback handler registered with the transfer engine.

use crate::error::Error;
use crate::transfer::TransferState;
use curl::easy::{InfoType, ReadError, SeekResult, WriteError};
use std::fmt;
use std::io;
use std::sync::Arc;

/// A curl easy handle bound to a [`RequestHandler`].
pub(crate) type EasyHandle = curl::easy::Easy2<RequestHandler>;

/// Continuation invoked on the agent thread when an attempt finishes. It
/// receives the easy handle back so a retrying request can resubmit it.
pub(crate) type Completion = Box<dyn FnOnce(EasyHandle, Result<(), Error>) + Send + 'static>;

/// Receives callbacks from curl as a transfer progresses and forwards them
/// into the request's shared state.
///
/// The handler is a thin trampoline: all interesting state (the response
/// under construction, the PUT body cursor, the cancellation flag) lives in
/// the [`TransferState`] it shares with the rest of the request. The one
/// thing it owns is the completion continuation for the current attempt,
/// which the agent takes out and invokes when curl reports the transfer
/// finished.
pub(crate) struct RequestHandler {
    state: Arc<TransferState>,
    completion: Option<Completion>,
}

impl RequestHandler {
    pub(crate) fn new(state: Arc<TransferState>) -> Self {
        Self {
            state,
            completion: None,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Install the continuation for the attempt about to be submitted.
    pub(crate) fn set_completion(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }

    pub(crate) fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }
}

impl curl::easy::Handler for RequestHandler {
    /// Gets called by curl for each line of data in the HTTP response header.
    fn header(&mut self, data: &[u8]) -> bool {
        // Abort the transfer if the request has been cancelled.
        if self.is_cancelled() {
            return false;
        }

        self.state.on_header_line(data);

        // Unparseable lines are ignored rather than treated as errors; curl
        // hands us every non-body line here and not all of them are headers.
        true
    }

    /// Gets called by curl when attempting to send bytes of the request body.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        if self.is_cancelled() {
            return Err(ReadError::Abort);
        }

        Ok(self.state.read_put_body(data))
    }

    /// Gets called by curl when it wants to seek to a certain position in
    /// the request body, e.g. when replaying the body after a redirect.
    fn seek(&mut self, whence: io::SeekFrom) -> SeekResult {
        if whence == io::SeekFrom::Start(0) && self.state.rewind_put_body() {
            SeekResult::Ok
        } else {
            // We can't do any other type of seek, sorry :(
            SeekResult::CantSeek
        }
    }

    /// Gets called by curl when bytes from the response body are received.
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.is_cancelled() {
            // Signals a write error to curl, which aborts the transfer.
            return Ok(0);
        }

        self.state.append_body(data);

        Ok(data.len())
    }

    /// Gets called by curl whenever it wishes to log a debug message.
    ///
    /// Normalizes the debug info and forwards it into our log.
    fn debug(&mut self, kind: InfoType, data: &[u8]) {
        struct FormatAscii<T>(T);

        impl<T: AsRef<[u8]>> fmt::Display for FormatAscii<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for &byte in self.0.as_ref() {
                    std::ascii::escape_default(byte).fmt(f)?;
                }
                Ok(())
            }
        }

        match kind {
            InfoType::Text => {
                tracing::debug!("{}", String::from_utf8_lossy(data).trim_end())
            }
            InfoType::HeaderIn | InfoType::DataIn => {
                tracing::trace!(target: "recurl::wire", "<< {}", FormatAscii(data))
            }
            InfoType::HeaderOut | InfoType::DataOut => {
                tracing::trace!(target: "recurl::wire", ">> {}", FormatAscii(data))
            }
            _ => (),
        }
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestHandler")
    }
}
