//! Supervisor core.
//!
//! Bootstrap runs once and hands a narrowed lease plus the daemon context
//! to the lifecycle loop. Protocol and scan work is delegated to engines.

pub mod bootstrap;
pub mod engine;
pub mod supervisor;
pub mod types;

pub use bootstrap::{Bootstrap, Bootstrapped, VERSION};
pub use engine::{Engine, IdleEngine, PendingCommands, SharedCommands};
pub use supervisor::{LoopExit, Supervisor};
pub use types::{DaemonContext, Layout, DEFAULT_NAME};
