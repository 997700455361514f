//! Startup errors for the server binary.
//!
//! Everything here is fatal: once the accept loop is running, failures are
//! contained per connection and never surface as a [`StartupError`].

use std::io;

use knock::ServerError;

use crate::config::ConfigError;

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The server runtime could not be built.
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The probe worker thread could not be started.
    #[error("failed to start probe worker: {0}")]
    ProbeWorker(#[source] io::Error),

    /// The interrupt handler could not be registered.
    #[error("failed to install interrupt handler: {0}")]
    Signal(#[source] io::Error),

    /// The listening socket could not be acquired.
    #[error(transparent)]
    Server(#[from] ServerError),
}
