//! Monitoring Module
//!
//! Subscriber setup for the `tracing` events the ledger emits.

pub mod logging;

pub use logging::{init_tracing, LogConfig, LogFormat, LogLevel};
