//! `ElasticDriver`: the orchestrator tying `HostManager`, `slots::assign`,
//! `WorkerStateRegistry`, `WorkerSupervisor` and `Results` together.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info};

use crate::config::DriverConfig;
use crate::discovery::HostDiscovery;
use crate::error::DriverError;
use crate::host::{HostEvent, HostManager};
use crate::launcher::{WorkerLauncher, WorkerNotifier};
use crate::registry::{RoundOutcomeSink, WorkerStateRegistry};
use crate::rendezvous::RendezvousService;
use crate::results::Results;
use crate::slots;
use crate::supervisor::{self, DriverQuery};
use crate::types::{HostInfo, SlotInfo};

#[derive(Default)]
struct AssignmentState {
    host_assignments: HashMap<Arc<str>, Vec<SlotInfo>>,
    rank_assignments: Vec<SlotInfo>,
    world_size: u32,
}

struct DriverInner {
    config: DriverConfig,
    host_manager: HostManager,
    registry: Arc<WorkerStateRegistry>,
    rendezvous: Arc<dyn RendezvousService>,
    launcher: Mutex<Option<Arc<dyn WorkerLauncher>>>,
    notifiers: Mutex<HashMap<(Arc<str>, u32), Arc<dyn WorkerNotifier>>>,
    assignment: Mutex<AssignmentState>,
    results: Arc<Results>,
    shutdown: Arc<HostEvent>,
    discovery_handle: Mutex<Option<JoinHandle<()>>>,
    discovery_started: AtomicBool,
    finished: AtomicBool,
    /// Set when a background recovery attempt (triggered by the registry
    /// off a supervisor thread, with no caller to return an `Err` to)
    /// hits a fatal error — `Timeout` or `StateBroadcastLost`.
    fatal: Mutex<Option<String>>,
    // Keeps the registry's weak back-reference alive; never read directly.
    #[allow(dead_code)]
    sink: Arc<DriverSink>,
}

impl DriverQuery for DriverInner {
    fn has_rank_assignment(&self, host: &str, local_rank: u32) -> bool {
        let assignment = self.assignment.lock().unwrap_or_else(|p| p.into_inner());
        assignment
            .host_assignments
            .get(host)
            .map(|slots| slots.iter().any(|s| s.local_rank == local_rank))
            .unwrap_or(false)
    }

    fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl DriverInner {
    /// Computes the candidate next assignment without installing it; if
    /// it is unchanged from the current one, skips notification (the
    /// assignment is stable, so there is nothing new to tell anyone).
    /// Notifies only the coordinator (rank 0).
    fn notify_workers_host_changes(&self) {
        let hosts = self.host_manager.get_available_hosts();
        let candidate = match slots::assign(&hosts, self.config.min_np, self.config.max_np) {
            Ok(slots) => slots,
            Err(_) => return,
        };
        let mut candidate_map: HashMap<Arc<str>, Vec<SlotInfo>> = HashMap::new();
        for s in &candidate {
            candidate_map.entry(s.hostname.clone()).or_default().push(s.clone());
        }

        let coordinator = {
            let current = self.assignment.lock().unwrap_or_else(|p| p.into_inner());
            if current.host_assignments == candidate_map {
                return;
            }
            match current.rank_assignments.first() {
                Some(s) => s.clone(),
                None => return,
            }
        };

        let notifier = {
            let notifiers = self.notifiers.lock().unwrap_or_else(|p| p.into_inner());
            match notifiers.get(&(coordinator.hostname.clone(), coordinator.local_rank)) {
                Some(n) => n.clone(),
                None => return,
            }
        };

        if let Err(e) = notifier.notify_hosts_updated(epoch_seconds()) {
            debug!("notify_hosts_updated to coordinator failed (swallowed): {e}");
        }
    }
}

/// Back-reference invoked by the registry when a round aborts. Holds a
/// `Weak<DriverInner>` only — no ownership cycle.
struct DriverSink(Weak<DriverInner>);

impl RoundOutcomeSink for DriverSink {
    fn on_round_failed(&self, failed_hosts: &[Arc<str>]) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        for host in failed_hosts {
            info!("blacklisting {host} after round failure");
            inner.host_manager.blacklist(host);
        }
        let driver = ElasticDriver { inner };
        if let Err(e) = driver.resume() {
            error!("fatal error resuming after round failure, aborting driver: {e}");
            *driver
                .inner
                .fatal
                .lock()
                .unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
            driver.stop();
        }
    }

    /// A committed round has no successor: every currently expected
    /// worker already reported a clean exit, so the job is over. Publish
    /// every participant's result here, in one batch, rather than
    /// leaving each supervisor's own exit handler to decide — whichever
    /// supervisor's report happens to complete the quorum is the only
    /// one for whom `finished()` could plausibly already hold, so a
    /// per-supervisor publish would silently drop every other
    /// participant's result (see `RoundOutcomeSink`'s doc comment).
    fn on_round_committed(&self, results: &[(String, (i32, u64))]) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let driver = ElasticDriver { inner: inner.clone() };
        driver.stop();
        for (key, value) in results {
            inner.results.add_result(key.clone(), *value);
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Orchestrates host discovery, slot assignment, rendezvous and worker
/// supervision for one elastic training job.
#[derive(Clone)]
pub struct ElasticDriver {
    inner: Arc<DriverInner>,
}

impl ElasticDriver {
    pub fn new(
        config: DriverConfig,
        discovery: Arc<dyn HostDiscovery>,
        rendezvous: Arc<dyn RendezvousService>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak_inner: &Weak<DriverInner>| {
            let sink = Arc::new(DriverSink(weak_inner.clone()));
            let sink_dyn: Arc<dyn RoundOutcomeSink> = sink.clone();
            let registry = Arc::new(WorkerStateRegistry::new(Arc::downgrade(&sink_dyn)));

            DriverInner {
                config,
                host_manager: HostManager::new(discovery),
                registry,
                rendezvous,
                launcher: Mutex::new(None),
                notifiers: Mutex::new(HashMap::new()),
                assignment: Mutex::new(AssignmentState::default()),
                results: Arc::new(Results::new()),
                shutdown: Arc::new(HostEvent::new()),
                discovery_handle: Mutex::new(None),
                discovery_started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                fatal: Mutex::new(None),
                sink,
            }
        });
        Self { inner }
    }

    /// First-round activation with target `np` workers.
    pub fn start(&self, np: u32, launcher: Arc<dyn WorkerLauncher>) -> Result<(), DriverError> {
        *self.inner.launcher.lock().unwrap_or_else(|p| p.into_inner()) = Some(launcher.clone());

        if !self.inner.discovery_started.swap(true, Ordering::SeqCst) {
            // The very first discovery call happens synchronously here so
            // a fatal misconfiguration propagates out of `start` instead
            // of dying silently on the background thread.
            self.inner.host_manager.update_available_hosts()?;
            let handle = self.spawn_discovery_thread();
            *self.inner.discovery_handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        }

        let target = np.clamp(self.inner.config.min_np, self.inner.config.max_np);
        self.activate_hosts(self.inner.config.min_np, target, launcher)
    }

    /// Activation at `min_np` after a failed round.
    pub fn resume(&self) -> Result<(), DriverError> {
        let launcher = self
            .inner
            .launcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| DriverError::Internal(anyhow::anyhow!("resume() called before start()")))?;
        self.activate_hosts(self.inner.config.min_np, self.inner.config.min_np, launcher)
    }

    /// Returns the fatal error that aborted the driver, if recovery ever
    /// hit one (`Timeout` or `StateBroadcastLost`). `start`/
    /// `resume` also return these directly when raised on the caller's
    /// own thread; this accessor covers the case where they are instead
    /// raised from the registry's background `resume()` retry off a
    /// supervisor thread, which has no caller to propagate an `Err` to.
    pub fn fatal_error(&self) -> Option<String> {
        self.inner.fatal.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Idempotent. Signals shutdown and joins the discovery thread.
    pub fn stop(&self) {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.fire();
        if let Some(handle) = self
            .inner
            .discovery_handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }

    pub fn finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Memoizes a notification client for `(host, local_rank)`, used to
    /// tell that worker when it becomes the coordinator's target.
    pub fn register_worker_server(&self, host: &str, local_rank: u32, notifier: Arc<dyn WorkerNotifier>) {
        self.inner
            .notifiers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((Arc::from(host), local_rank), notifier);
    }

    pub fn record_ready(&self, host: &str, local_rank: u32) {
        self.inner.registry.record_ready(host, local_rank);
    }

    pub fn get_slot_info(&self, host: &str, local_rank: u32) -> Option<SlotInfo> {
        let assignment = self.inner.assignment.lock().unwrap_or_else(|p| p.into_inner());
        assignment
            .host_assignments
            .get(host)
            .and_then(|slots| slots.get(local_rank as usize))
            .cloned()
    }

    pub fn world_size(&self) -> u32 {
        self.inner.assignment.lock().unwrap_or_else(|p| p.into_inner()).world_size
    }

    pub fn local_size(&self, host: &str) -> u32 {
        let assignment = self.inner.assignment.lock().unwrap_or_else(|p| p.into_inner());
        assignment.host_assignments.get(host).map(|v| v.len() as u32).unwrap_or(0)
    }

    pub fn get_available_hosts(&self) -> Vec<HostInfo> {
        self.inner.host_manager.get_available_hosts()
    }

    /// Blocks until all spawned supervisors complete and returns the
    /// collected results. Should only be called after `stop()`.
    pub fn get_results(&self) -> HashMap<String, (i32, u64)> {
        debug_assert!(
            self.finished(),
            "get_results() should be called only after stop()"
        );
        self.inner.results.get_results()
    }

    fn spawn_discovery_thread(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        std::thread::spawn(move || {
            info!("discovery thread started");
            loop {
                if inner.shutdown.is_fired() {
                    break;
                }
                match inner.host_manager.update_available_hosts() {
                    Ok(true) => inner.notify_workers_host_changes(),
                    Ok(false) => {}
                    Err(e) => error!("unexpected error polling discovery: {e}"),
                }
                if inner.shutdown.wait_timeout(inner.config.poll_interval) {
                    break;
                }
            }
            info!("discovery thread exiting");
        })
    }

    /// Runs one activation: waits for enough capacity, computes and
    /// installs the new assignment, pushes it to rendezvous, opens a
    /// fresh round, and spawns supervisors for newly assigned slots.
    fn activate_hosts(
        &self,
        min_np: u32,
        target_np: u32,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<(), DriverError> {
        self.inner
            .host_manager
            .wait_for_available_hosts(min_np, self.inner.config.start_timeout)?;

        let previous_active: HashSet<(Arc<str>, u32)> = {
            let assignment = self.inner.assignment.lock().unwrap_or_else(|p| p.into_inner());
            assignment.host_assignments.values().flatten().map(|s| s.key()).collect()
        };
        let prev_hosts: HashSet<Arc<str>> = previous_active.iter().map(|(h, _)| h.clone()).collect();

        let hosts = self.inner.host_manager.get_available_hosts();
        let new_slots = slots::assign(&hosts, min_np, target_np)?;

        if !prev_hosts.is_empty() {
            let next_hosts: HashSet<Arc<str>> = new_slots.iter().map(|s| s.hostname.clone()).collect();
            if prev_hosts.is_disjoint(&next_hosts) {
                return Err(DriverError::StateBroadcastLost);
            }
        }

        let mut host_assignments: HashMap<Arc<str>, Vec<SlotInfo>> = HashMap::new();
        for s in &new_slots {
            host_assignments.entry(s.hostname.clone()).or_default().push(s.clone());
        }
        let world_size = new_slots.len() as u32;

        {
            let mut assignment = self.inner.assignment.lock().unwrap_or_else(|p| p.into_inner());
            assignment.host_assignments = host_assignments;
            assignment.rank_assignments = new_slots.clone();
            assignment.world_size = world_size;
        }

        self.inner.rendezvous.init(&new_slots)?;

        let expected: HashSet<(Arc<str>, u32)> = new_slots.iter().map(|s| s.key()).collect();
        self.inner.registry.reset(expected);

        let driver_query: Arc<dyn DriverQuery> = self.inner.clone();
        for slot in &new_slots {
            if previous_active.contains(&slot.key()) {
                continue; // still active from the previous round; will re-rendezvous on its own
            }
            let shutdown = self.inner.shutdown.clone();
            let host_event = self.inner.host_manager.get_host_event(&slot.hostname);
            let handle = supervisor::spawn(
                slot.clone(),
                launcher.clone(),
                shutdown,
                host_event,
                self.inner.registry.clone(),
                self.inner.results.clone(),
                driver_query.clone(),
            );
            self.inner.results.expect(handle);
        }

        Ok(())
    }
}
