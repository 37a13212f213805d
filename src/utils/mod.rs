//! Utilities
//!
//! Descriptor hygiene for re-exec and the PID marker file.

pub mod fd_closure;
pub mod pidfile;
