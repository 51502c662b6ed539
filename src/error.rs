//! Types for error handling.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// All possible types of errors that can be returned from recurl.
///
/// HTTP status codes are never errors by themselves: a `4xx` or `5xx`
/// response is returned as a normal [`Response`](crate::Response) and it is
/// up to the caller to inspect the status. Only transport-level failures,
/// timeouts, and cancellation surface through this type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The request was dropped before a result could be produced, for
    /// example because the client shut down mid-flight.
    Aborted,

    /// The server certificate could not be validated.
    BadServerCertificate,

    /// The request was cancelled by the caller.
    Cancelled,

    /// Failed to connect to the server.
    ConnectionFailed,

    /// Couldn't resolve the host name.
    CouldntResolveHost,

    /// An I/O error not covered by a more specific kind.
    Io,

    /// The response violated the HTTP protocol, or the request could not be
    /// expressed as a valid transfer.
    ProtocolViolation,

    /// An attempt, or the whole retry sequence, took longer than the
    /// configured time budget.
    Timeout,

    /// Failed to negotiate a secure connection.
    TlsHandshake,

    /// The redirect limit was exceeded.
    TooManyRedirects,

    /// Everything else the transfer engine can produce.
    Other,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            Self::Aborted => "request aborted before completion",
            Self::BadServerCertificate => "server certificate could not be validated",
            Self::Cancelled => "request cancelled",
            Self::ConnectionFailed => "failed to connect to the server",
            Self::CouldntResolveHost => "couldn't resolve host name",
            Self::Io => "I/O error",
            Self::ProtocolViolation => "protocol violation",
            Self::Timeout => "request took longer than the configured timeout",
            Self::TlsHandshake => "TLS handshake failed",
            Self::TooManyRedirects => "max redirect limit exceeded",
            Self::Other => "transfer engine error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// An error produced while executing a request.
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    message: Option<String>,
}

impl Error {
    pub(crate) fn new(
        kind: ErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind,
            source: Some(source.into()),
            message: None,
        }
    }

    pub(crate) fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: None,
            message: Some(message.into()),
        }
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether this error is a transport-level failure: anything that
    /// prevented a complete HTTP response from being received, including a
    /// per-attempt timeout, but not an explicit cancellation.
    pub fn is_transport(&self) -> bool {
        !matches!(self.kind, ErrorKind::Cancelled | ErrorKind::Aborted)
    }

    /// Whether this error was caused by an elapsed time budget.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Whether this error was caused by cancelling the request.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("kind", &self.kind);

        if let Some(message) = self.message.as_ref() {
            s.field("message", message);
        }

        if let Some(source) = self.source.as_ref() {
            s.field("source", source);
        }

        s.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.message.as_ref(), self.source.as_ref()) {
            (Some(message), _) => write!(f, "{}: {}", self.kind, message),
            (None, Some(source)) => write!(f, "{}: {}", self.kind, source),
            (None, None) => fmt::Display::fmt(&self.kind, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
impl From<curl::Error> for Error {
    fn from(error: curl::Error) -> Error {
        let kind = if error.is_couldnt_connect() {
            ErrorKind::ConnectionFailed
        } else if error.is_couldnt_resolve_host() || error.is_couldnt_resolve_proxy() {
            ErrorKind::CouldntResolveHost
        } else if error.is_peer_failed_verification() || error.is_ssl_cacert() {
            ErrorKind::BadServerCertificate
        } else if error.is_ssl_connect_error()
            || error.is_ssl_certproblem()
            || error.is_ssl_cacert_badfile()
            || error.is_ssl_engine_initfailed()
            || error.is_ssl_engine_notfound()
            || error.is_ssl_engine_setfailed()
        {
            ErrorKind::TlsHandshake
        } else if error.is_operation_timedout() {
            ErrorKind::Timeout
        } else if error.is_too_many_redirects() {
            ErrorKind::TooManyRedirects
        } else if error.is_got_nothing() || error.is_bad_content_encoding() {
            ErrorKind::ProtocolViolation
        } else if error.is_aborted_by_callback() {
            // Callbacks only abort on behalf of the caller.
            ErrorKind::Cancelled
        } else if error.is_read_error() || error.is_write_error() || error.is_partial_file() {
            ErrorKind::Io
        } else {
            ErrorKind::Other
        };

        Error::new(kind, error)
    }
}

#[doc(hidden)]
impl From<curl::MultiError> for Error {
    fn from(error: curl::MultiError) -> Error {
        Error::new(ErrorKind::Other, error)
    }
}

#[doc(hidden)]
impl From<curl::FormError> for Error {
    fn from(error: curl::FormError) -> Error {
        Error::new(ErrorKind::ProtocolViolation, error)
    }
}

#[doc(hidden)]
impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        let kind = match error.kind() {
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionFailed,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Io,
        };

        Error::new(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_description() {
        let error = Error::from_kind(ErrorKind::Timeout);

        assert_eq!(
            error.to_string(),
            "request took longer than the configured timeout"
        );
    }

    #[test]
    fn cancellation_is_not_a_transport_failure() {
        assert!(!Error::from_kind(ErrorKind::Cancelled).is_transport());
        assert!(Error::from_kind(ErrorKind::ConnectionFailed).is_transport());
        assert!(Error::from_kind(ErrorKind::Timeout).is_transport());
    }

    #[test]
    fn io_errors_map_to_specific_kinds() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(Error::from(refused).kind(), ErrorKind::ConnectionFailed);

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(Error::from(timed_out).kind(), ErrorKind::Timeout);
    }

    static_assertions::assert_impl_all!(Error: Send, Sync);
}
