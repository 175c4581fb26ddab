//! `WorkerSupervisor`: one OS thread per spawned slot. Invokes the
//! external launcher, logs each step, and forwards the outcome to the
//! registry.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info};

use crate::host::HostEvent;
use crate::launcher::WorkerLauncher;
use crate::registry::WorkerStateRegistry;
use crate::results::Results;
use crate::types::SlotInfo;

/// The subset of `ElasticDriver` a supervisor needs to decide whether its
/// exit is the terminal one for a slot. Kept as a trait so `supervisor`
/// doesn't need to depend on `driver`'s concrete type.
pub trait DriverQuery: Send + Sync {
    fn has_rank_assignment(&self, host: &str, local_rank: u32) -> bool;
    fn finished(&self) -> bool;
}

/// Spawns the supervisor thread for `slot` and returns its join handle.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    slot: SlotInfo,
    launcher: Arc<dyn WorkerLauncher>,
    shutdown: Arc<HostEvent>,
    host_event: Arc<HostEvent>,
    registry: Arc<WorkerStateRegistry>,
    results: Arc<Results>,
    driver: Arc<dyn DriverQuery>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        info!("supervisor for {}[{}] starting", slot.hostname, slot.local_rank);
        let (exit_code, timestamp) = launcher.launch(&slot, shutdown, host_event);
        info!(
            "supervisor for {}[{}] observed exit code {exit_code}",
            slot.hostname, slot.local_rank
        );
        handle_worker_exit(&slot, exit_code, timestamp, &registry, &results, driver.as_ref());
    })
}

fn handle_worker_exit(
    slot: &SlotInfo,
    exit_code: i32,
    timestamp: u64,
    registry: &WorkerStateRegistry,
    _results: &Results,
    driver: &dyn DriverQuery,
) {
    if !driver.has_rank_assignment(&slot.hostname, slot.local_rank) {
        debug!(
            "{}[{}] exited after being dropped from the assignment; ignoring",
            slot.hostname, slot.local_rank
        );
        return;
    }

    let outcome = (exit_code, timestamp);
    let round_id = if exit_code == 0 {
        registry.record_success(&slot.hostname, slot.local_rank, outcome)
    } else {
        registry.record_failure(&slot.hostname, slot.local_rank, outcome)
    };

    // Publishing into `Results` happens from the registry's
    // `on_round_committed` callback, in one batch, once every expected
    // participant has reported success — not here.
    if round_id.is_none() {
        debug!("{}[{}] report not accounted for", slot.hostname, slot.local_rank);
    }
}
