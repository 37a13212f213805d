//! opmon: process supervisor and sandbox bootstrap for a long-running
//! network monitor daemon.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::signal`]: Async-safe signal bridge and sticky process flags
//! - [`kernel::lease`]: Two-phase privilege lease and path grant journal
//! - [`kernel::daemon`]: Fork, detach and stdio redirection
//!
//! ## Execution Control ([`exec`])
//! - [`exec::restart`]: In-place restart by re-exec with the original argv
//!
//! ## Core ([`core`])
//! - [`core::bootstrap`]: Ordered startup sequence up to the narrowed lease
//! - [`core::supervisor`]: Lifecycle loop
//! - [`core::engine`]: Engine interface and command timeout sweep
//! - [`core::types`]: Daemon context and directory layout
//!
//! ## Observability ([`observability`])
//! - [`observability::logging`]: Primary log with console fallback and rotation
//! - [`observability::scanlog`]: Scan result log
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error type and supervisor options
//! - [`config::loader`]: Configuration collaborator boundary
//!
//! ## Utilities ([`utils`])
//! - [`utils::fd_closure`]: Close-on-exec hygiene
//! - [`utils::pidfile`]: PID marker file
//!
//! ## Testing Infrastructure ([`testing`])
//! - Recording backends, daemonizers, process images, sinks and engines
//!
//! # Design Principles
//!
//! 1. **Handlers only flip flags** - all real work happens in the loop
//! 2. **Leases only narrow** - every path is named before the lease drops
//! 3. **Types prevent errors** - illegal lease orderings do not compile
//! 4. **Minimal unsafe** - thin wrappers with explicit preconditions

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Supervisor core
pub mod core;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the opmon binary.
pub mod cli;

pub use config::types::{Options, Result, SupervisorError};
