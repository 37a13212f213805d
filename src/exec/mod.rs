//! Execution control
//!
//! Restart by re-executing the installed binary with the captured invocation.

pub mod restart;

pub use restart::{HostImage, Invocation, ProcessImage, RestartCoordinator, RestartFailure};
