//! Process-level helpers.

pub mod sig_down;

pub use sig_down::SigDown;
