//! `HostManager`: polls the discovery provider, maintains the
//! authoritative current host set, blacklists hosts on failure, and
//! issues per-host cancellation signals consumed by workers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::discovery::HostDiscovery;
use crate::error::DriverError;
use crate::types::HostInfo;

/// A fire-once cancellation latch for one host. Once fired it stays
/// fired — a lost host never comes back. Doubles as the driver's
/// shutdown signal, since both are "permanently fire once, let anyone
/// waiting wake up" latches.
#[derive(Default)]
pub struct HostEvent {
    fired: AtomicBool,
    waiters: Mutex<()>,
    cond: Condvar,
}

impl HostEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        let _guard = self.waiters.lock().unwrap_or_else(|p| p.into_inner());
        self.cond.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Blocks until fired or `timeout` elapses. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_fired() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.waiters.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if self.is_fired() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _result) = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = g;
        }
    }
}

#[derive(Default)]
struct HostState {
    available_hosts: HashSet<Arc<str>>,
    host_slots: HashMap<Arc<str>, u32>,
    blacklist: HashSet<Arc<str>>,
    ordered_available_hosts: Vec<Arc<str>>,
}

/// Polls the discovery provider, maintains the authoritative current host
/// set, blacklists hosts on failure, and issues per-host cancellation
/// signals consumed by workers.
pub struct HostManager {
    discovery: Arc<dyn HostDiscovery>,
    state: Mutex<HostState>,
    changed: Condvar,
    host_events: Mutex<HashMap<Arc<str>, Arc<HostEvent>>>,
    first_call_done: AtomicBool,
}

impl HostManager {
    pub fn new(discovery: Arc<dyn HostDiscovery>) -> Self {
        Self {
            discovery,
            state: Mutex::new(HostState::default()),
            changed: Condvar::new(),
            host_events: Mutex::new(HashMap::new()),
            first_call_done: AtomicBool::new(false),
        }
    }

    /// Invokes the discovery provider once. Returns `true` iff the
    /// available set changed from the previous observation.
    ///
    /// Errors on the first call are fatal and propagate; later errors are
    /// transient — logged and swallowed, retaining the previous set.
    pub fn update_available_hosts(&self) -> Result<bool, DriverError> {
        let is_first = !self.first_call_done.swap(true, Ordering::SeqCst);

        let discovered = match self.discovery.discover() {
            Ok(d) => d,
            Err(e) if is_first => return Err(DriverError::DiscoveryFatal(e.to_string())),
            Err(e) => {
                warn!("transient discovery error, retaining previous host set: {e}");
                return Ok(false);
            }
        };

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let new_available: HashSet<Arc<str>> = discovered
            .keys()
            .filter(|h| !state.blacklist.contains(h.as_str()))
            .map(|h| Arc::from(h.as_str()))
            .collect();
        let new_slots: HashMap<Arc<str>, u32> = discovered
            .into_iter()
            .filter(|(h, _)| !state.blacklist.contains(h.as_str()))
            .map(|(h, s)| (Arc::from(h.as_str()), s))
            .collect();

        let changed = new_available != state.available_hosts || new_slots != state.host_slots;

        let vanished: Vec<Arc<str>> = state
            .available_hosts
            .iter()
            .filter(|h| !new_available.contains(*h))
            .cloned()
            .collect();

        for host in &vanished {
            debug!("host {host} disappeared from discovery");
            self.fire_event_for(host);
        }

        state
            .ordered_available_hosts
            .retain(|h| new_available.contains(h));
        // `new_available` is a HashSet, so its iteration order is not
        // reproducible; sort hosts first seen in this tick so ties within
        // one discovery snapshot resolve deterministically, keeping the
        // ordering stable and the downstream assigner's output stable too.
        let mut newly_seen: Vec<Arc<str>> = new_available
            .iter()
            .filter(|h| !state.ordered_available_hosts.contains(*h))
            .cloned()
            .collect();
        newly_seen.sort();
        state.ordered_available_hosts.extend(newly_seen);
        state.available_hosts = new_available;
        state.host_slots = new_slots;

        if changed {
            self.changed.notify_all();
        }

        Ok(changed)
    }

    /// Adds `hostname` to the blacklist, fires its cancellation signal,
    /// and removes it from the available set. Idempotent.
    pub fn blacklist(&self, hostname: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.blacklist.insert(Arc::from(hostname)) {
            return; // already blacklisted
        }
        state.available_hosts.remove(hostname);
        state.host_slots.remove(hostname);
        state.ordered_available_hosts.retain(|h| &**h != hostname);
        drop(state);

        self.fire_event_for(hostname);
        self.changed.notify_all();
    }

    fn fire_event_for(&self, hostname: &str) {
        let mut events = self.host_events.lock().unwrap_or_else(|p| p.into_inner());
        events
            .entry(Arc::from(hostname))
            .or_insert_with(|| Arc::new(HostEvent::new()))
            .fire();
    }

    /// Returns (creating if absent) the cancellation signal for `hostname`.
    pub fn get_host_event(&self, hostname: &str) -> Arc<HostEvent> {
        let mut events = self.host_events.lock().unwrap_or_else(|p| p.into_inner());
        events
            .entry(Arc::from(hostname))
            .or_insert_with(|| Arc::new(HostEvent::new()))
            .clone()
    }

    /// Stable first-seen ordering of currently available hosts, used as
    /// the assigner's input order.
    pub fn get_available_hosts(&self) -> Vec<HostInfo> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .ordered_available_hosts
            .iter()
            .map(|h| HostInfo::new(h.clone(), *state.host_slots.get(h).unwrap_or(&0)))
            .collect()
    }

    pub fn total_available_slots(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.host_slots.values().sum()
    }

    /// Blocks until `sum_of_slots(available_hosts) >= min_np` or
    /// `timeout` elapses. Spurious-wake-safe: re-checks the predicate and
    /// the deadline after every wake.
    pub fn wait_for_available_hosts(&self, min_np: u32, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());

        loop {
            let total: u32 = guard.host_slots.values().sum();
            if total >= min_np {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout(timeout));
            }
            let (g, _result) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = g;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as Map;

    use super::*;
    use crate::discovery::SequencedDiscovery;

    fn tick(pairs: &[(&str, u32)]) -> Map<String, u32> {
        pairs.iter().map(|(h, s)| (h.to_string(), *s)).collect()
    }

    #[test]
    fn first_update_populates_available_hosts() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![tick(&[("h1", 2), ("h2", 2)])]));
        let manager = HostManager::new(discovery);
        assert!(manager.update_available_hosts().unwrap());
        assert_eq!(manager.total_available_slots(), 4);
    }

    #[test]
    fn second_identical_update_reports_no_change() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2)]),
            tick(&[("h1", 2)]),
        ]));
        let manager = HostManager::new(discovery);
        assert!(manager.update_available_hosts().unwrap());
        assert!(!manager.update_available_hosts().unwrap());
    }

    #[test]
    fn reordered_but_set_equal_update_reports_no_change() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2), ("h2", 2)]),
            tick(&[("h2", 2), ("h1", 2)]),
        ]));
        let manager = HostManager::new(discovery);
        assert!(manager.update_available_hosts().unwrap());
        assert!(!manager.update_available_hosts().unwrap());
    }

    #[test]
    fn blacklist_is_idempotent_and_fires_event() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![tick(&[("h1", 2)])]));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();

        let event = manager.get_host_event("h1");
        assert!(!event.is_fired());

        manager.blacklist("h1");
        manager.blacklist("h1"); // idempotent
        assert!(event.is_fired());
        assert_eq!(manager.total_available_slots(), 0);
    }

    #[test]
    fn wait_for_available_hosts_times_out() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![tick(&[])]));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();
        let err = manager
            .wait_for_available_hosts(2, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
    }

    #[test]
    fn vanished_host_fires_its_event_without_blacklisting() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2), ("h2", 2)]),
            tick(&[("h1", 2)]),
        ]));
        let manager = HostManager::new(discovery);
        manager.update_available_hosts().unwrap();
        let event = manager.get_host_event("h2");
        assert!(!event.is_fired());
        manager.update_available_hosts().unwrap();
        assert!(event.is_fired());
    }
}
