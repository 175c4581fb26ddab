//! The rendezvous HTTP service. Only the `init(slot_list)` call is this
//! crate's responsibility; the wire format workers poll against is an
//! external concern.

use std::sync::Mutex;

use crate::error::DriverError;
use crate::types::SlotInfo;

pub trait RendezvousService: Send + Sync {
    fn init(&self, slots: &[SlotInfo]) -> Result<(), DriverError>;
}

/// An in-memory rendezvous service double: records the slot list it was
/// last pushed, round-tripping it through JSON the way the real HTTP
/// `init` call would serialize it over the wire.
#[derive(Default)]
pub struct InMemoryRendezvous {
    last_push: Mutex<Option<String>>,
}

impl InMemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_push(&self) -> Option<Vec<SlotInfo>> {
        let raw = self.last_push.lock().unwrap_or_else(|p| p.into_inner());
        raw.as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

impl RendezvousService for InMemoryRendezvous {
    fn init(&self, slots: &[SlotInfo]) -> Result<(), DriverError> {
        let encoded = serde_json::to_string(slots)
            .map_err(|e| DriverError::Internal(anyhow::anyhow!(e)))?;
        *self.last_push.lock().unwrap_or_else(|p| p.into_inner()) = Some(encoded);
        Ok(())
    }
}
