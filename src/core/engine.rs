//! Work units driven by the lifecycle loop.
//!
//! The protocol and scan engines are external collaborators. The loop only
//! calls `cycle()` once per iteration and `timer()` once per elapsed second.

use log::{debug, info, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Engine {
    fn name(&self) -> &str;

    /// One bounded quantum of work. Must return promptly.
    fn cycle(&mut self);

    /// Called exactly once per elapsed second.
    fn timer(&mut self);
}

/// Placeholder engine that only paces the loop.
#[derive(Debug, Clone)]
pub struct IdleEngine {
    name: String,
    quantum: Duration,
    ticks: u64,
}

impl IdleEngine {
    pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(50);

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_quantum(name, Self::DEFAULT_QUANTUM)
    }

    pub fn with_quantum(name: impl Into<String>, quantum: Duration) -> Self {
        Self {
            name: name.into(),
            quantum,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Engine for IdleEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(&mut self) {
        std::thread::sleep(self.quantum);
    }

    fn timer(&mut self) {
        self.ticks += 1;
        trace!("{} -> tick {}", self.name, self.ticks);
    }
}

/// An operator command waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: u64,
    pub target: String,
    pub queued_at: Instant,
}

/// Operator commands awaiting completion, oldest first.
///
/// Swept once per second; anything older than the timeout is dropped.
#[derive(Debug)]
pub struct PendingCommands {
    timeout: Duration,
    entries: VecDeque<PendingCommand>,
    next_id: u64,
}

/// Handle shared between the loop and the engines that queue commands.
pub type SharedCommands = Arc<Mutex<PendingCommands>>;

impl PendingCommands {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: VecDeque::new(),
            next_id: 1,
        }
    }

    pub fn shared(timeout: Duration) -> SharedCommands {
        Arc::new(Mutex::new(Self::new(timeout)))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue a command for `target`, returning its id.
    pub fn push(&mut self, target: impl Into<String>, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(PendingCommand {
            id,
            target: target.into(),
            queued_at: now,
        });
        id
    }

    /// Remove a command whose reply arrived.
    pub fn complete(&mut self, id: u64) -> Option<PendingCommand> {
        let index = self.entries.iter().position(|c| c.id == id)?;
        self.entries.remove(index)
    }

    /// Drop every command queued more than `timeout` before `now`.
    pub fn sweep(&mut self, now: Instant) -> Vec<PendingCommand> {
        let timeout = self.timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|c| now.saturating_duration_since(c.queued_at) > timeout);
        self.entries = kept.into();

        for command in &expired {
            info!(
                "COMMAND -> Command {} for {} timed out",
                command.id, command.target
            );
        }
        if !expired.is_empty() {
            debug!("COMMAND -> {} command(s) still pending", self.entries.len());
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_drops_only_expired_commands() {
        let start = Instant::now();
        let mut queue = PendingCommands::new(Duration::from_secs(180));
        let old = queue.push("#opers", start);
        let fresh = queue.push("alice", start + Duration::from_secs(100));

        let expired = queue.sweep(start + Duration::from_secs(181));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old);
        assert_eq!(queue.len(), 1);
        assert!(queue.complete(fresh).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn command_at_exact_timeout_is_kept() {
        let start = Instant::now();
        let mut queue = PendingCommands::new(Duration::from_secs(10));
        queue.push("bob", start);

        assert!(queue.sweep(start + Duration::from_secs(10)).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn complete_unknown_id_is_none() {
        let mut queue = PendingCommands::new(Duration::from_secs(10));
        queue.push("carol", Instant::now());
        assert!(queue.complete(42).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let now = Instant::now();
        let mut queue = PendingCommands::new(Duration::from_secs(10));
        let a = queue.push("a", now);
        let b = queue.push("b", now);
        assert!(b > a);
    }

    #[test]
    fn idle_engine_counts_ticks() {
        let mut engine = IdleEngine::with_quantum("irc", Duration::from_millis(0));
        engine.cycle();
        engine.timer();
        engine.timer();
        assert_eq!(engine.ticks(), 2);
        assert_eq!(engine.name(), "irc");
    }
}
