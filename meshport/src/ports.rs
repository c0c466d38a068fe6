//! C7 — Port Allocator.
//!
//! A process-wide, write-once-per-protocol cache mapping protocol name to
//! the port chosen the first time that protocol needed a random port. Reads
//! never block writers; concurrent first-callers race and only one port
//! survives in the cache (the loser's port can be returned to the OS on
//! next use — `spec.md` §9 open question 3 leaves what happens to it
//! undefined, so this implementation simply drops it).

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct PortCache {
    ports: RwLock<HashMap<String, u16>>,
}

impl PortCache {
    pub fn new() -> Self {
        Self { ports: RwLock::new(HashMap::new()) }
    }

    /// Returns the cached port for `protocol`, if any random port has been
    /// recorded for it yet.
    pub fn get(&self, protocol: &str) -> Option<u16> {
        self.ports.read().unwrap().get(protocol).copied()
    }

    /// Records `port` for `protocol` only if nothing has been recorded yet.
    /// Under a race, exactly one writer wins; callers whose port did not win
    /// should treat their own port as a one-off (return it to the OS).
    pub fn record_first(&self, protocol: &str, port: u16) -> u16 {
        let mut ports = self.ports.write().unwrap();
        *ports.entry(protocol.to_string()).or_insert(port)
    }
}
