//! Worker launcher and worker notification client: external collaborators
//! modeled as traits so a real process launcher / RPC client can be
//! swapped in without touching the driver or supervisor.

use std::sync::Arc;

use crate::error::DriverError;
use crate::host::HostEvent;
use crate::types::SlotInfo;

/// Runs the user training function for one slot to completion and
/// returns its terminal `(exit_code, epoch_seconds)`. Must honor both
/// cancellation signals for prompt teardown.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, slot: &SlotInfo, shutdown: Arc<HostEvent>, host_event: Arc<HostEvent>) -> (i32, u64);
}

/// RPC stub used to tell the coordinator that host membership changed.
/// Any failure is tolerable — the caller logs and swallows it.
pub trait WorkerNotifier: Send + Sync {
    fn notify_hosts_updated(&self, timestamp: u64) -> Result<(), DriverError>;
}

/// An in-memory launcher for tests: runs a closure instead of spawning a
/// real process. The closure receives both cancellation signals by
/// reference so it can exercise cooperative shutdown the way a real
/// launcher must.
pub struct ScriptedLauncher<F>
where
    F: Fn(&SlotInfo, &HostEvent, &HostEvent) -> (i32, u64) + Send + Sync,
{
    behavior: F,
}

impl<F> ScriptedLauncher<F>
where
    F: Fn(&SlotInfo, &HostEvent, &HostEvent) -> (i32, u64) + Send + Sync,
{
    pub fn new(behavior: F) -> Self {
        Self { behavior }
    }
}

impl<F> WorkerLauncher for ScriptedLauncher<F>
where
    F: Fn(&SlotInfo, &HostEvent, &HostEvent) -> (i32, u64) + Send + Sync,
{
    fn launch(&self, slot: &SlotInfo, shutdown: Arc<HostEvent>, host_event: Arc<HostEvent>) -> (i32, u64) {
        (self.behavior)(slot, &shutdown, &host_event)
    }
}

/// An in-memory notifier for tests: records every notification it
/// receives instead of placing an RPC call.
#[derive(Default)]
pub struct RecordingNotifier {
    received: std::sync::Mutex<Vec<u64>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received_timestamps(&self) -> Vec<u64> {
        self.received.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl WorkerNotifier for RecordingNotifier {
    fn notify_hosts_updated(&self, timestamp: u64) -> Result<(), DriverError> {
        self.received
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(timestamp);
        Ok(())
    }
}
