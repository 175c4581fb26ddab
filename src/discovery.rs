//! The host discovery provider: an external collaborator modeled as a
//! trait so a production implementation (etcd watch, cloud API poll,
//! hostfile tail) can be swapped in without touching `HostManager`.

use std::collections::HashMap;

use crate::error::DriverError;

/// Enumerates currently live hostnames and their advertised slot counts.
/// May fail; see `HostManager`'s first-call-fatal / later-call-transient
/// policy.
pub trait HostDiscovery: Send + Sync {
    fn discover(&self) -> Result<HashMap<String, u32>, DriverError>;
}

/// A test double that replays a fixed sequence of discovery results,
/// repeating the last entry once the sequence is exhausted. Used by the
/// scenario tests in `tests/scenarios.rs`.
pub struct SequencedDiscovery {
    ticks: std::sync::Mutex<Vec<HashMap<String, u32>>>,
    index: std::sync::atomic::AtomicUsize,
}

impl SequencedDiscovery {
    pub fn new(ticks: Vec<HashMap<String, u32>>) -> Self {
        Self {
            ticks: std::sync::Mutex::new(ticks),
            index: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl HostDiscovery for SequencedDiscovery {
    fn discover(&self) -> Result<HashMap<String, u32>, DriverError> {
        let ticks = self.ticks.lock().unwrap_or_else(|p| p.into_inner());
        if ticks.is_empty() {
            return Ok(HashMap::new());
        }
        let i = self
            .index
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            .min(ticks.len() - 1);
        Ok(ticks[i].clone())
    }
}
