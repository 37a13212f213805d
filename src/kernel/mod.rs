//! Thin wrappers around host kernel primitives.
//!
//! Most `unsafe` code lives here, each block with an explicit SAFETY comment.
//! Dependency direction: signal -> lease -> daemon

pub mod daemon;
pub mod lease;
pub mod signal;
