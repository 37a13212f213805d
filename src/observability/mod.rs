//! Observability
//!
//! Primary daemon log (rotatable, console fallback) and the scan result log.

pub mod logging;
pub mod scanlog;

pub use logging::{LogSink, PrimaryLog};
pub use scanlog::ScanLog;
