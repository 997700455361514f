//! Interrupt handling.
//!
//! This module provides [`SigDown`], which turns SIGINT into the server's
//! shutdown protocol: set the [`ShutdownFlag`], then make sure the accept
//! loop wakes up to see it.
//!
//! On Unix it listens for SIGINT. On Windows it listens for Ctrl+C.
//!
//! # Example
//!
//! ```ignore
//! use knock_server::util::SigDown;
//!
//! let sig_down = SigDown::try_new(flag.clone(), worker.handle(), WakeStrategy::SelfDial)?;
//! accept_loop.run().await;
//! sig_down.close().await;
//! ```
//!
//! # Architecture
//!
//! The OS-level handler installed by Tokio only records the signal and wakes
//! the runtime's signal driver; no I/O ever happens in the signal-delivery
//! context. [`SigDown`] spawns a background task that receives the
//! notification and runs [`on_interrupt`]: it flips the flag and, in
//! [`WakeStrategy::SelfDial`] mode, asks the dedicated probe worker to dial
//! the listener, waiting only on the worker's one-shot reply.
//!
//! The [`TaskTracker`] is used to ensure the listener task completes before
//! the application exits.

#[cfg(unix)]
use tokio::signal::unix::SignalKind;
#[cfg(unix)]
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use knock::{ProbeHandle, ProbeOutcome, ShutdownFlag, WakeStrategy};

/// Listens for interrupts and drives the shutdown protocol.
///
/// Every delivery is handled; only the first one has an effect.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    task_tracker: TaskTracker,
    stop: CancellationToken,
}

impl SigDown {
    /// Registers the interrupt handler and starts the listener task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if signal registration fails.
    #[allow(clippy::unnecessary_wraps)] // Result needed on Unix for signal registration
    pub fn try_new(
        flag: ShutdownFlag,
        probe: ProbeHandle,
        wake: WakeStrategy,
    ) -> Result<Self, std::io::Error> {
        let stop = CancellationToken::new();
        let listener_stop = stop.clone();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigint = signal(SignalKind::interrupt())?;
            task_tracker.spawn(async move {
                loop {
                    tokio::select! {
                        () = listener_stop.cancelled() => break,
                        received = sigint.recv() => {
                            if received.is_none() {
                                break;
                            }
                            on_interrupt(&flag, &probe, wake).await;
                        }
                    }
                }
            });
        }

        #[cfg(windows)]
        {
            task_tracker.spawn(async move {
                loop {
                    tokio::select! {
                        () = listener_stop.cancelled() => break,
                        received = tokio::signal::ctrl_c() => {
                            if received.is_err() {
                                break;
                            }
                            on_interrupt(&flag, &probe, wake).await;
                        }
                    }
                }
            });
        }

        task_tracker.close();
        Ok(Self { task_tracker, stop })
    }

    /// Stops listening for interrupts and waits for the listener task.
    pub async fn close(self) {
        self.stop.cancel();
        self.task_tracker.wait().await;
    }
}

/// Reacts to one interrupt delivery.
///
/// The first delivery sets the flag and, under [`WakeStrategy::SelfDial`],
/// returns the probe's outcome once the dummy connection has been made and
/// closed (or the dial has failed). Later deliveries only log.
pub async fn on_interrupt(
    flag: &ShutdownFlag,
    probe: &ProbeHandle,
    wake: WakeStrategy,
) -> Option<ProbeOutcome> {
    if !flag.request_shutdown() {
        tracing::info!("shutdown already in progress");
        return None;
    }

    tracing::info!("shutdown requested");
    match wake {
        WakeStrategy::SelfDial => Some(probe.unblock().await),
        WakeStrategy::Cancellable => None,
    }
}
