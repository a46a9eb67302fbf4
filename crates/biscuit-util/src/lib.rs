//! Shared utilities for biscuit.
//!
//! Currently only logging setup with tracing.

pub mod log;

pub use log::{LogConfig, LogError, LogGuard, LogLevel};
