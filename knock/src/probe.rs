//! Self-dial probe that wakes a pending `accept()`.
//!
//! A blocked accept has no cancellation hook in the accept loop's
//! [`SelfDial`](crate::server::WakeStrategy::SelfDial) mode. The probe makes
//! it return by opening a connection to the server's own address and closing
//! it without sending a byte. The accept loop sees an empty connection,
//! closes it, re-checks the shutdown flag and exits.
//!
//! # Architecture
//!
//! The interrupt path must not do unbounded work in whatever context it runs
//! in, so the dial itself lives on a [`ProbeWorker`]: a dedicated OS thread
//! with its own current-thread runtime, started before the listener is bound.
//! Callers hold a cheap [`ProbeHandle`] and submit requests over a channel;
//! each request carries a `oneshot` sender the worker answers on. The caller
//! only ever waits on that reply, never on the worker's scheduler.
//!
//! ```text
//!  interrupt ──► ProbeHandle::unblock ──mpsc──► ProbeWorker thread
//!                        ▲                            │ connect + close
//!                        └───────── oneshot ◄─────────┘
//! ```
//!
//! Dial failures are never escalated. A refused connection usually means the
//! listener is not up yet (or already gone), in which case there is nothing
//! to unblock.

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::address::ServerAddress;
use crate::error::ProbeError;

/// Default upper bound on the probe's connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one unblock attempt.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The dummy connection was established and closed.
    Unblocked,
    /// The dial failed; shutdown proceeds without it.
    Absorbed(ProbeError),
}

impl ProbeOutcome {
    /// Whether the dummy connection reached the listener.
    #[must_use]
    pub const fn is_unblocked(&self) -> bool {
        matches!(self, Self::Unblocked)
    }
}

/// Dials a fixed address once per [`unblock`](Self::unblock) call.
#[derive(Debug, Clone, Copy)]
pub struct UnblockProbe {
    target: SocketAddr,
    connect_timeout: Duration,
}

impl UnblockProbe {
    /// Creates a probe aimed at the listener bound to `address`.
    #[must_use]
    pub fn new(address: &ServerAddress) -> Self {
        Self {
            target: address.dial_target(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// The address this probe dials.
    #[must_use]
    pub const fn target(&self) -> SocketAddr {
        self.target
    }

    /// Opens a connection to the target and closes it immediately.
    ///
    /// Never fails: dial errors are logged and returned as
    /// [`ProbeOutcome::Absorbed`].
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "knock.probe.unblock", skip_all, fields(probe.addr = %self.target))
    )]
    pub async fn unblock(&self) -> ProbeOutcome {
        match self.dial().await {
            Ok(()) => {
                tracing::info!(addr = %self.target, "dummy connection closed to unblock accept");
                ProbeOutcome::Unblocked
            }
            Err(err) => {
                tracing::warn!(error = %err, "unblock probe failed, nothing to unblock");
                ProbeOutcome::Absorbed(err)
            }
        }
    }

    async fn dial(&self) -> Result<(), ProbeError> {
        let addr = self.target;
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProbeError::Timeout {
                addr,
                timeout: self.connect_timeout,
            })?
            .map_err(|source| ProbeError::Connect { addr, source })?;
        stream
            .shutdown()
            .await
            .map_err(|source| ProbeError::Close { addr, source })
    }
}

type ProbeRequest = oneshot::Sender<ProbeOutcome>;

/// Submits unblock requests to a running [`ProbeWorker`].
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    requests: mpsc::UnboundedSender<ProbeRequest>,
}

impl ProbeHandle {
    /// Asks the worker to dial and waits for its answer.
    pub async fn unblock(&self) -> ProbeOutcome {
        match self.submit() {
            Some(reply) => reply.await.unwrap_or_else(|_| worker_gone()),
            None => worker_gone(),
        }
    }

    /// Blocking variant of [`unblock`](Self::unblock) for synchronous callers.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    #[must_use]
    pub fn unblock_blocking(&self) -> ProbeOutcome {
        match self.submit() {
            Some(reply) => reply.blocking_recv().unwrap_or_else(|_| worker_gone()),
            None => worker_gone(),
        }
    }

    fn submit(&self) -> Option<oneshot::Receiver<ProbeOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).ok()?;
        Some(rx)
    }
}

const fn worker_gone() -> ProbeOutcome {
    ProbeOutcome::Absorbed(ProbeError::WorkerGone)
}

/// Dedicated thread that owns the probe and performs every dial.
///
/// # Example
///
/// ```rust,no_run
/// use knock::{ProbeWorker, ServerAddress, UnblockProbe};
///
/// let worker = ProbeWorker::spawn(UnblockProbe::new(&ServerAddress::default()))?;
/// let handle = worker.handle();
///
/// // From a thread that is not driving a runtime:
/// let outcome = handle.unblock_blocking();
/// println!("unblocked: {}", outcome.is_unblocked());
///
/// worker.shutdown();
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct ProbeWorker {
    handle: ProbeHandle,
    stop: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ProbeWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker's runtime or thread cannot be created.
    pub fn spawn(probe: UnblockProbe) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<ProbeRequest>();
        let stop = CancellationToken::new();
        let worker_stop = stop.clone();

        let thread = thread::Builder::new()
            .name("knock-probe".to_owned())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            biased;
                            () = worker_stop.cancelled() => break,
                            request = rx.recv() => {
                                let Some(reply) = request else { break };
                                // The requester may have given up waiting.
                                let _ = reply.send(probe.unblock().await);
                            }
                        }
                    }
                });
                tracing::debug!("probe worker stopped");
            })?;

        tracing::debug!(addr = %probe.target(), "probe worker started");
        Ok(Self {
            handle: ProbeHandle { requests: tx },
            stop,
            thread: Some(thread),
        })
    }

    /// Returns a handle for submitting unblock requests.
    #[must_use]
    pub fn handle(&self) -> ProbeHandle {
        self.handle.clone()
    }

    /// Stops the worker and joins its thread.
    ///
    /// Requests submitted afterwards resolve to
    /// [`ProbeError::WorkerGone`].
    pub fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("probe worker thread panicked");
            }
        }
    }
}

impl Drop for ProbeWorker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
