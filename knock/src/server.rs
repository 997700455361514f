//! The accept loop.
//!
//! One connection at a time: accept, handle to completion, check the shutdown
//! flag, repeat. The flag is never consulted while `accept()` is pending, so
//! in [`WakeStrategy::SelfDial`] mode something has to make accept return;
//! that is the job of the [`UnblockProbe`](crate::probe::UnblockProbe).
//!
//! # States
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │ flag clear
//!       Listening ──► Accepted ──► Handling ──► CheckingShutdown
//!                                                           │ flag set
//!                                                           ▼
//!                                                      Terminated
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::address::ServerAddress;
use crate::error::ServerError;
use crate::http::{ConnectionOutcome, handle_connection};
use crate::shutdown::ShutdownFlag;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 128;

/// Pause after a failed accept, so a persistent error such as file
/// descriptor exhaustion does not turn into a hot loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming connections.
///
/// Implemented for [`TcpListener`]; tests wrap it to observe how often the
/// loop asks for a connection.
#[async_trait]
pub trait Acceptor: Send {
    /// Connection type yielded by this acceptor.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Waits for the next connection.
    async fn next_connection(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn next_connection(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept().await
    }
}

/// How a pending accept is woken for shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakeStrategy {
    /// Accept is not interruptible; the unblock probe dials in to wake it.
    #[default]
    SelfDial,
    /// Accept races the shutdown flag and is abandoned when it is set.
    Cancellable,
}

/// Position of the loop in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting in accept.
    Listening,
    /// A connection was returned by accept.
    Accepted,
    /// The connection is being served.
    Handling,
    /// The connection is closed; deciding whether to accept again.
    CheckingShutdown,
    /// The loop has exited and will not accept again.
    Terminated,
}

/// Connection counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Connections returned by accept.
    pub accepted: u64,
    /// Connections that received a response.
    pub responded: u64,
    /// Connections that closed without sending data.
    pub empty: u64,
    /// Connections whose handling failed.
    pub failed: u64,
}

enum Accept<S> {
    Connection(S, SocketAddr),
    Failed(io::Error),
    Cancelled,
}

/// Sequential accept-handle-check loop.
#[derive(Debug)]
pub struct AcceptLoop<A> {
    acceptor: A,
    shutdown: ShutdownFlag,
    wake: WakeStrategy,
    state: LoopState,
    summary: LoopSummary,
}

impl AcceptLoop<TcpListener> {
    /// Binds and listens on `address`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] or [`ServerError::Listen`] if the socket
    /// cannot be acquired. Both are fatal.
    pub fn bind(
        address: &ServerAddress,
        backlog: u32,
        shutdown: ShutdownFlag,
    ) -> Result<Self, ServerError> {
        let addr = address.socket_addr();
        let bind_err = |source| ServerError::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket
            .listen(backlog)
            .map_err(|source| ServerError::Listen { addr, source })?;

        tracing::debug!(%addr, backlog, "listener bound");
        Ok(Self::new(listener, shutdown))
    }

    /// Address the listener is actually bound to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::LocalAddr`] if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.acceptor.local_addr().map_err(ServerError::LocalAddr)
    }
}

impl<A: Acceptor> AcceptLoop<A> {
    /// Wraps an already listening acceptor.
    pub fn new(acceptor: A, shutdown: ShutdownFlag) -> Self {
        Self {
            acceptor,
            shutdown,
            wake: WakeStrategy::default(),
            state: LoopState::Listening,
            summary: LoopSummary::default(),
        }
    }

    /// Selects how a pending accept is woken for shutdown.
    #[must_use]
    pub fn with_wake_strategy(mut self, wake: WakeStrategy) -> Self {
        self.wake = wake;
        self
    }

    /// Current state.
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// Counters so far.
    pub const fn summary(&self) -> LoopSummary {
        self.summary
    }

    /// Runs until the shutdown flag is observed.
    ///
    /// The flag is checked before every accept, so a shutdown requested
    /// before the loop starts terminates it without accepting anything.
    /// Per-connection and accept errors are logged and never end the loop.
    pub async fn run(&mut self) -> LoopSummary {
        while !self.shutdown.is_shutdown_requested() {
            self.transition(LoopState::Listening);
            tracing::debug!("accepting incoming connections");

            match self.accept().await {
                Accept::Connection(stream, peer) => {
                    self.transition(LoopState::Accepted);
                    self.summary.accepted += 1;
                    tracing::info!(%peer, "accepted connection");

                    self.transition(LoopState::Handling);
                    let outcome = handle_connection(stream, peer).await;
                    self.record(&outcome);
                    tracing::debug!(%peer, "connection handled and closed");
                }
                Accept::Failed(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
                Accept::Cancelled => {
                    tracing::debug!("pending accept abandoned for shutdown");
                }
            }

            self.transition(LoopState::CheckingShutdown);
        }

        self.transition(LoopState::Terminated);
        tracing::info!(
            accepted = self.summary.accepted,
            responded = self.summary.responded,
            empty = self.summary.empty,
            failed = self.summary.failed,
            "HTTP server shut down"
        );
        self.summary
    }

    async fn accept(&mut self) -> Accept<A::Stream> {
        let result = match self.wake {
            WakeStrategy::SelfDial => self.acceptor.next_connection().await,
            WakeStrategy::Cancellable => {
                tokio::select! {
                    biased;
                    () = self.shutdown.requested() => return Accept::Cancelled,
                    result = self.acceptor.next_connection() => result,
                }
            }
        };
        match result {
            Ok((stream, peer)) => Accept::Connection(stream, peer),
            Err(err) => Accept::Failed(err),
        }
    }

    fn record(&mut self, outcome: &ConnectionOutcome) {
        match outcome {
            ConnectionOutcome::Responded { .. } => self.summary.responded += 1,
            ConnectionOutcome::Empty => self.summary.empty += 1,
            ConnectionOutcome::Failed(_) => self.summary.failed += 1,
        }
    }

    fn transition(&mut self, next: LoopState) {
        tracing::trace!(from = ?self.state, to = ?next, "accept loop transition");
        self.state = next;
    }
}
