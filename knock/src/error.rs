//! Error types for the listener, the unblock probe and the HTTP handler.
//!
//! Only [`ServerError`] is fatal. [`ProbeError`] is absorbed by the probe and
//! [`HttpError`] never leaves the per-connection handler.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Failure to acquire the listening socket at startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Creating or binding the socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested bind address.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Switching the bound socket into the listening state failed.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// The bound address.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The listener could not report its local address.
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Why a self-dial did not reach the listener.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The connection attempt failed (refused, reset, unreachable).
    #[error("dial to {addr} failed: {source}")]
    Connect {
        /// The dialled address.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The connection attempt did not complete in time.
    #[error("dial to {addr} timed out after {timeout:?}")]
    Timeout {
        /// The dialled address.
        addr: SocketAddr,
        /// The configured connect timeout.
        timeout: Duration,
    },

    /// The connection was established but closing it failed.
    #[error("closing dummy connection to {addr} failed: {source}")]
    Close {
        /// The dialled address.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The probe worker thread has stopped.
    #[error("probe worker is not running")]
    WorkerGone,
}

/// Per-connection failure, contained by the handler.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Reading the request failed.
    #[error("failed to read request: {0}")]
    Read(#[source] io::Error),

    /// The first line did not carry method, path and version.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// Writing the response failed.
    #[error("failed to write response: {0}")]
    Write(#[source] io::Error),
}
