use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Capacity advertised by the discovery provider for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: Arc<str>,
    pub slots: u32,
}

impl HostInfo {
    pub fn new(hostname: impl Into<Arc<str>>, slots: u32) -> Self {
        Self {
            hostname: hostname.into(),
            slots,
        }
    }
}

/// An immutable slot assignment produced by [`crate::slots::assign`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotInfo {
    pub hostname: Arc<str>,
    pub rank: u32,
    pub local_rank: u32,
    pub cross_rank: u32,
    pub size: u32,
    pub local_size: u32,
    pub cross_size: u32,
}

impl SlotInfo {
    /// The `(host, local_rank)` pair used as a participant key throughout
    /// the registry and results map.
    pub fn key(&self) -> (Arc<str>, u32) {
        (self.hostname.clone(), self.local_rank)
    }

    /// `"host[local_rank]"`, the key `Results` stores terminal outcomes
    /// under.
    pub fn results_key(&self) -> String {
        format!("{}[{}]", self.hostname, self.local_rank)
    }
}
