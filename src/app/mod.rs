//! Binary-side plumbing: logging setup, signal handling and exit codes.

pub(crate) mod exit_handler;
pub(crate) mod runtime;
pub(crate) mod terminal;
