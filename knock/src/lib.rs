#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Accept loop and shutdown coordination for a single-connection HTTP listener.
//!
//! The listener handles one connection at a time and only looks at its
//! shutdown flag between connections. An interrupt therefore has to do two
//! things: flip the [`ShutdownFlag`](shutdown::ShutdownFlag), and make the
//! pending `accept()` return. The [`UnblockProbe`](probe::UnblockProbe) does
//! the latter by dialling the server's own listening address and closing the
//! connection straight away; the [`AcceptLoop`](server::AcceptLoop) treats
//! that dial-in as an empty connection, re-checks the flag and exits.
//!
//! # Modules
//!
//! - [`address`] — The bind endpoint and the loopback target the probe dials
//! - [`error`] — Error types for the listener, the probe and the HTTP handler
//! - [`http`] — Request-line parsing, the HTML response and the per-connection handler
//! - [`probe`] — The self-dial probe and the dedicated worker thread that runs it
//! - [`server`] — The [`Acceptor`](server::Acceptor) seam and the accept loop state machine
//! - [`shutdown`] — The monotonic, injectable shutdown flag
//!
//! # Feature Flags
//!
//! - `telemetry` — Wraps the probe and the connection handler in tracing spans

pub mod address;
pub mod error;
pub mod http;
pub mod probe;
pub mod server;
pub mod shutdown;

pub use address::ServerAddress;
pub use error::{HttpError, ProbeError, ServerError};
pub use probe::{ProbeHandle, ProbeOutcome, ProbeWorker, UnblockProbe};
pub use server::{AcceptLoop, Acceptor, LoopState, LoopSummary, WakeStrategy};
pub use shutdown::ShutdownFlag;
