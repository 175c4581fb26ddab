//! End-to-end scenario tests against the in-memory test doubles, one per
//! literal scenario in the elastic driver's testable-properties section
//! (clean run, host loss + recovery, total host loss, start timeout,
//! stable-notification skip, and a late report against a dropped host).

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use elastic_driver::discovery::SequencedDiscovery;
    use elastic_driver::error::DriverError;
    use elastic_driver::host::HostEvent;
    use elastic_driver::launcher::{RecordingNotifier, ScriptedLauncher, WorkerLauncher, WorkerNotifier};
    use elastic_driver::rendezvous::InMemoryRendezvous;
    use elastic_driver::types::SlotInfo;
    use elastic_driver::{DriverConfig, ElasticDriver};

    fn tick(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(h, s)| (h.to_string(), *s)).collect()
    }

    fn config(min_np: u32, max_np: u32, start_timeout: Duration, poll_interval: Duration) -> DriverConfig {
        DriverConfig {
            min_np,
            max_np,
            start_timeout,
            poll_interval,
        }
    }

    fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate() {
                return;
            }
            assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// S1 — clean run: all four workers report ready, then exit 0.
    #[test]
    fn s1_clean_run_all_workers_succeed() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![tick(&[("h1", 2), ("h2", 2)])]));
        let rendezvous = Arc::new(InMemoryRendezvous::new());
        let driver = ElasticDriver::new(
            config(2, 4, Duration::from_secs(5), Duration::from_millis(20)),
            discovery,
            rendezvous,
        );

        let driver_for_launcher = driver.clone();
        let launcher: Arc<dyn WorkerLauncher> = Arc::new(ScriptedLauncher::new(
            move |slot: &SlotInfo, _shutdown: &HostEvent, _host_event: &HostEvent| {
                driver_for_launcher.record_ready(&slot.hostname, slot.local_rank);
                (0, 1_000)
            },
        ));

        driver.start(4, launcher).expect("start should succeed");
        assert_eq!(driver.world_size(), 4);

        wait_until(Duration::from_secs(2), || driver.finished());

        let results = driver.get_results();
        assert_eq!(results.len(), 4, "unexpected results: {results:?}");
        for key in ["h1[0]", "h1[1]", "h2[0]", "h2[1]"] {
            assert_eq!(results.get(key), Some(&(0, 1_000)), "missing/wrong result for {key}");
        }
    }

    /// S2 — host loss, recovery: h2 vanishes and its workers fail, h1
    /// survives and the round recovers at world_size=2.
    #[test]
    fn s2_host_loss_triggers_blacklist_and_recovery() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2), ("h2", 2)]),
            tick(&[("h1", 2)]),
        ]));
        let rendezvous = Arc::new(InMemoryRendezvous::new());
        let driver = ElasticDriver::new(
            config(2, 4, Duration::from_secs(5), Duration::from_millis(15)),
            discovery,
            rendezvous,
        );

        let launcher: Arc<dyn WorkerLauncher> = Arc::new(ScriptedLauncher::new(
            |slot: &SlotInfo, _shutdown: &HostEvent, host_event: &HostEvent| {
                if &*slot.hostname == "h2" {
                    // notices the host_event fired once discovery drops it
                    host_event.wait_timeout(Duration::from_secs(2));
                    (1, 2_000)
                } else {
                    // keeps training across the recovery round; this slot
                    // is never respawned, so one call spans both rounds
                    std::thread::sleep(Duration::from_millis(400));
                    (0, 3_000)
                }
            },
        ));

        driver.start(4, launcher).expect("start should succeed");
        assert_eq!(driver.world_size(), 4);

        wait_until(Duration::from_secs(3), || driver.finished());

        assert!(
            driver.fatal_error().is_none(),
            "h1 surviving the round must not raise StateBroadcastLost"
        );
        assert_eq!(driver.world_size(), 2);

        let hosts: Vec<_> = driver.get_available_hosts().into_iter().map(|h| h.hostname).collect();
        assert_eq!(hosts.len(), 1);
        assert_eq!(&*hosts[0], "h1");

        let results = driver.get_results();
        assert_eq!(results.len(), 2, "unexpected results: {results:?}");
        assert_eq!(results.get("h1[0]"), Some(&(0, 3_000)));
        assert_eq!(results.get("h1[1]"), Some(&(0, 3_000)));
    }

    /// S3 — total host loss: both h1 workers fail and discovery now only
    /// offers h2; no host survives the round boundary, so the driver
    /// aborts with `StateBroadcastLost`.
    #[test]
    fn s3_total_host_loss_raises_state_broadcast_lost() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2)]),
            tick(&[("h2", 2)]),
        ]));
        let rendezvous = Arc::new(InMemoryRendezvous::new());
        let driver = ElasticDriver::new(
            config(2, 4, Duration::from_secs(5), Duration::from_millis(15)),
            discovery,
            rendezvous,
        );

        let launcher: Arc<dyn WorkerLauncher> = Arc::new(ScriptedLauncher::new(
            |_slot: &SlotInfo, _shutdown: &HostEvent, _host_event: &HostEvent| (1, 4_000),
        ));

        driver.start(2, launcher).expect("start should succeed");
        assert_eq!(driver.world_size(), 2);

        wait_until(Duration::from_secs(3), || driver.fatal_error().is_some());

        let err = driver.fatal_error().unwrap();
        assert!(
            err.contains("state broadcast"),
            "expected a state-broadcast-lost error, got: {err}"
        );
        assert!(driver.finished());
    }

    /// S4 — start timeout: discovery never offers any hosts, so
    /// `wait_for_available_hosts` times out and `start` propagates a
    /// fatal `Timeout`.
    #[test]
    fn s4_start_times_out_when_no_hosts_available() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![HashMap::new()]));
        let rendezvous = Arc::new(InMemoryRendezvous::new());
        let driver = ElasticDriver::new(
            config(2, 4, Duration::from_millis(300), Duration::from_millis(50)),
            discovery,
            rendezvous,
        );

        let launcher: Arc<dyn WorkerLauncher> = Arc::new(ScriptedLauncher::new(
            |_slot: &SlotInfo, _shutdown: &HostEvent, _host_event: &HostEvent| (0, 0),
        ));

        let started = Instant::now();
        let err = driver.start(2, launcher).unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// S5 — stable notification skip: a host set change that doesn't
    /// alter the candidate assignment (growth beyond `max_np`) must not
    /// notify the coordinator.
    #[test]
    fn s5_growth_past_max_np_skips_coordinator_notification() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2), ("h2", 2)]),
            tick(&[("h1", 2), ("h2", 2), ("h3", 2)]),
        ]));
        let rendezvous = Arc::new(InMemoryRendezvous::new());
        let driver = ElasticDriver::new(
            config(2, 4, Duration::from_secs(5), Duration::from_millis(15)),
            discovery,
            rendezvous,
        );

        let launcher: Arc<dyn WorkerLauncher> = Arc::new(ScriptedLauncher::new(
            |_slot: &SlotInfo, _shutdown: &HostEvent, host_event: &HostEvent| {
                host_event.wait_timeout(Duration::from_secs(10));
                (0, 5_000)
            },
        ));
        driver.start(4, launcher).expect("start should succeed");
        assert_eq!(driver.world_size(), 4);

        let coordinator = driver
            .get_slot_info("h1", 0)
            .expect("h1[0] should hold a slot");
        assert_eq!(coordinator.rank, 0, "h1[0] should be the coordinator (rank 0)");

        let notifier = Arc::new(RecordingNotifier::new());
        let notifier_dyn: Arc<dyn WorkerNotifier> = notifier.clone();
        driver.register_worker_server("h1", 0, notifier_dyn);

        wait_until(Duration::from_secs(2), || driver.get_available_hosts().len() == 3);
        // give the discovery thread a chance to run its notification path
        std::thread::sleep(Duration::from_millis(150));

        assert!(
            notifier.received_timestamps().is_empty(),
            "an unchanged candidate assignment must not notify the coordinator"
        );

        driver.stop();
    }

    /// S6 — late report: a worker on a host already dropped from the
    /// assignment (after its sibling's failure triggered recovery) later
    /// exits cleanly. Its report must be silently discarded, not crash,
    /// and never reach `Results`.
    #[test]
    fn s6_late_success_from_dropped_host_is_silently_discarded() {
        let discovery = Arc::new(SequencedDiscovery::new(vec![
            tick(&[("h1", 2), ("h2", 2)]),
            tick(&[("h1", 2)]),
        ]));
        let rendezvous = Arc::new(InMemoryRendezvous::new());
        let driver = ElasticDriver::new(
            config(2, 4, Duration::from_secs(5), Duration::from_millis(15)),
            discovery,
            rendezvous,
        );

        let launcher: Arc<dyn WorkerLauncher> = Arc::new(ScriptedLauncher::new(
            |slot: &SlotInfo, _shutdown: &HostEvent, host_event: &HostEvent| {
                match (&*slot.hostname, slot.local_rank) {
                    ("h2", 0) => {
                        host_event.wait_timeout(Duration::from_secs(2));
                        (1, 6_000)
                    }
                    ("h2", 1) => {
                        // slower to notice; exits cleanly well after h2
                        // has already been dropped from the assignment
                        std::thread::sleep(Duration::from_millis(500));
                        (0, 6_001)
                    }
                    _ => {
                        std::thread::sleep(Duration::from_millis(300));
                        (0, 7_000)
                    }
                }
            },
        ));

        driver.start(4, launcher).expect("start should succeed");
        wait_until(Duration::from_secs(3), || driver.finished());

        let results = driver.get_results();
        assert_eq!(results.len(), 2, "unexpected results: {results:?}");
        assert_eq!(results.get("h1[0]"), Some(&(0, 7_000)));
        assert_eq!(results.get("h1[1]"), Some(&(0, 7_000)));
        assert!(!results.contains_key("h2[0]"));
        assert!(
            !results.contains_key("h2[1]"),
            "late success from a dropped host must not be published"
        );
    }
}
