//! Shared helpers for binaries and callers of the bus.

pub mod bootstrap;
pub mod retry;
