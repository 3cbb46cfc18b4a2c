//! Error types for the socket clients.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by socket client commands.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level error (socket operations after the connection is up).
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Connection establishment failed.
    #[error("Connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        /// The endpoint that was dialed.
        endpoint: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// TLS/SSL error (configuration or handshake).
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Operation timed out.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command needs an established connection.
    #[error("Not connected")]
    NotConnected,

    /// A connection attempt is already running or established.
    #[error("Already connected or connecting")]
    AlreadyConnected,

    /// The connection was closed before the command completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Internal error (should not happen in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Returns true if this error is potentially retryable.
    ///
    /// Retryable errors are transient network conditions. Everything else
    /// points at a configuration or usage problem.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ConnectionFailed { .. }
                | Self::TlsError(_)
                | Self::Timeout(_)
                | Self::ConnectionClosed
        )
    }

    /// Returns true if this is a fatal error that should not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

/// Error code carried by [`SocketEvent::Error`](crate::SocketEvent::Error).
///
/// This is a small `Copy` classification of the socket error so handlers can
/// match on it without holding on to the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketErrorCode {
    /// The remote actively refused the connection (or a datagram).
    ConnectionRefused,
    /// The connection was reset by the remote.
    ConnectionReset,
    /// The connection was aborted locally.
    ConnectionAborted,
    /// The operation timed out.
    TimedOut,
    /// The socket is not connected.
    NotConnected,
    /// The local address is already in use.
    AddressInUse,
    /// The requested address could not be assigned or resolved.
    AddressNotAvailable,
    /// Write on a socket whose peer has gone away.
    BrokenPipe,
    /// The stream ended in the middle of an operation.
    UnexpectedEof,
    /// TLS handshake or certificate validation failed.
    HandshakeFailed,
    /// Any other error.
    Other,
}

impl From<&io::Error> for SocketErrorCode {
    fn from(err: &io::Error) -> Self {
        // tokio-rustls reports handshake failures as io::Error wrapping rustls::Error
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<rustls::Error>())
        {
            return Self::HandshakeFailed;
        }

        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::ConnectionReset => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::NotConnected => Self::NotConnected,
            io::ErrorKind::AddrInUse => Self::AddressInUse,
            io::ErrorKind::AddrNotAvailable => Self::AddressNotAvailable,
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            _ => Self::Other,
        }
    }
}

impl From<&ClientError> for SocketErrorCode {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::Transport(source) | ClientError::ConnectionFailed { source, .. } => {
                Self::from(source)
            }
            ClientError::TlsError(_) => Self::HandshakeFailed,
            ClientError::Timeout(_) => Self::TimedOut,
            ClientError::NotConnected | ClientError::ConnectionClosed => Self::NotConnected,
            ClientError::AlreadyConnected | ClientError::Config(_) | ClientError::Internal(_) => {
                Self::Other
            }
        }
    }
}

impl fmt::Display for SocketErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionRefused => "ConnectionRefused",
            Self::ConnectionReset => "ConnectionReset",
            Self::ConnectionAborted => "ConnectionAborted",
            Self::TimedOut => "TimedOut",
            Self::NotConnected => "NotConnected",
            Self::AddressInUse => "AddressInUse",
            Self::AddressNotAvailable => "AddressNotAvailable",
            Self::BrokenPipe => "BrokenPipe",
            Self::UnexpectedEof => "UnexpectedEof",
            Self::HandshakeFailed => "HandshakeFailed",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}
