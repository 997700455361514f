//! Single-connection HTTP listener with interrupt-driven shutdown.
//!
//! The binary wires the pieces of [`knock`] together: it loads
//! [`ServerConfig`](config::ServerConfig), starts the probe worker, installs
//! [`SigDown`](util::SigDown) and runs the accept loop as the root task of a
//! current-thread runtime.
//!
//! # Modules
//!
//! - [`config`] — Server configuration with environment variable expansion
//! - [`error`] — Startup error types
//! - [`util`] — Interrupt handling

pub mod config;
pub mod error;
pub mod util;

pub use config::ServerConfig;
pub use error::StartupError;
