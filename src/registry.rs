//! `WorkerStateRegistry`: tracks one rendezvous round's participant
//! quorum.
//!
//! Structured as an explicit state-per-participant machine driven by an
//! event handler, guarded by a mutex rather than owned by a single
//! thread, since reports arrive concurrently from every supervisor.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

/// Per-participant state within a rendezvous round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Unreported,
    Ready,
    Success,
    Failure,
}

/// Back-reference capability invoked when a round finalizes. Held as a
/// `Weak` pointer by the registry — no cyclic ownership between the
/// registry and whatever implements recovery.
///
/// Committed results are delivered in one batch rather than left for
/// each supervisor to publish independently: finalization only happens
/// on whichever participant's report completes the quorum, so a
/// per-supervisor check of "did my report land in the committed round"
/// would only ever be true for that one report, silently dropping every
/// other participant's result.
pub trait RoundOutcomeSink: Send + Sync {
    fn on_round_failed(&self, failed_hosts: &[Arc<str>]);

    fn on_round_committed(&self, _results: &[(String, (i32, u64))]) {}
}

struct RegistryState {
    round_id: u64,
    expected: HashSet<(Arc<str>, u32)>,
    participants: HashMap<(Arc<str>, u32), ParticipantState>,
    outcomes: HashMap<(Arc<str>, u32), (i32, u64)>,
    finalized: bool,
    last_rendezvous: Option<u64>,
}

/// Per-rendezvous quorum tracker.
pub struct WorkerStateRegistry {
    state: Mutex<RegistryState>,
    sink: Weak<dyn RoundOutcomeSink>,
}

impl WorkerStateRegistry {
    pub fn new(sink: Weak<dyn RoundOutcomeSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                round_id: 0,
                expected: HashSet::new(),
                participants: HashMap::new(),
                outcomes: HashMap::new(),
                finalized: true,
                last_rendezvous: None,
            }),
            sink,
        }
    }

    /// Closes the current round (it is simply discarded, finalized or
    /// not) and opens a new one with `expected` as its participant set.
    /// Returns the new round id.
    pub fn reset(&self, expected: HashSet<(Arc<str>, u32)>) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.round_id += 1;
        state.expected = expected;
        state.participants = HashMap::new();
        state.outcomes = HashMap::new();
        state.finalized = false;
        info!("registry opened round {} with {} expected participants", state.round_id, state.expected.len());
        state.round_id
    }

    pub fn round_id(&self) -> u64 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).round_id
    }

    pub fn last_rendezvous(&self) -> Option<u64> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last_rendezvous
    }

    /// `UNREPORTED -> READY`. No-op if the participant isn't expected in
    /// the current round or has already reported.
    pub fn record_ready(&self, host: &str, local_rank: u32) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let key = (Arc::from(host), local_rank);
        if !state.expected.contains(&key) {
            debug!("record_ready for unexpected participant {host}[{local_rank}] ignored");
            return;
        }
        let entry = state
            .participants
            .entry(key)
            .or_insert(ParticipantState::Unreported);
        if *entry == ParticipantState::Unreported {
            *entry = ParticipantState::Ready;
        }
    }

    pub fn record_success(&self, host: &str, local_rank: u32, outcome: (i32, u64)) -> Option<u64> {
        self.record_terminal(host, local_rank, ParticipantState::Success, outcome)
    }

    pub fn record_failure(&self, host: &str, local_rank: u32, outcome: (i32, u64)) -> Option<u64> {
        self.record_terminal(host, local_rank, ParticipantState::Failure, outcome)
    }

    /// Records a terminal report and, if it completes the round's quorum,
    /// finalizes the round and notifies the sink with every participant's
    /// outcome at once (not just the reporting caller's) — see
    /// `RoundOutcomeSink`'s doc comment for why this can't be decided
    /// independently by each caller.
    fn record_terminal(
        &self,
        host: &str,
        local_rank: u32,
        new_state: ParticipantState,
        outcome: (i32, u64),
    ) -> Option<u64> {
        enum Finalization {
            Committed(Vec<(String, (i32, u64))>),
            Aborted(Vec<Arc<str>>),
        }
        let mut finalization: Option<Finalization> = None;
        let round_id;

        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let key = (Arc::from(host), local_rank);

            if !state.expected.contains(&key) {
                debug!("stale report for unexpected participant {host}[{local_rank}] discarded");
                return None;
            }
            if state.finalized {
                debug!("report for {host}[{local_rank}] arrived after round finalized; discarded");
                return None;
            }
            let current = state
                .participants
                .get(&key)
                .copied()
                .unwrap_or(ParticipantState::Unreported);
            if matches!(current, ParticipantState::Success | ParticipantState::Failure) {
                debug!("duplicate terminal report for {host}[{local_rank}] discarded");
                return None;
            }

            state.participants.insert(key.clone(), new_state);
            state.outcomes.insert(key, outcome);
            round_id = state.round_id;

            // Abort is "any failure": a single lost worker is decisive and
            // must trigger recovery without waiting for every other
            // still-training worker to also exit. Commit is "all success":
            // the job is only over once every expected participant has
            // cleanly finished.
            if new_state == ParticipantState::Failure {
                state.finalized = true;
                let failed_hosts: Vec<Arc<str>> = state
                    .expected
                    .iter()
                    .filter(|k| state.participants.get(*k) == Some(&ParticipantState::Failure))
                    .map(|(h, _)| h.clone())
                    .collect();
                finalization = Some(Finalization::Aborted(failed_hosts));
            } else {
                let all_success = state
                    .expected
                    .iter()
                    .all(|k| state.participants.get(k) == Some(&ParticipantState::Success));
                if all_success {
                    state.finalized = true;
                    state.last_rendezvous = Some(round_id);
                    let results: Vec<(String, (i32, u64))> = state
                        .expected
                        .iter()
                        .map(|(h, r)| (format!("{h}[{r}]"), state.outcomes[&(h.clone(), *r)]))
                        .collect();
                    finalization = Some(Finalization::Committed(results));
                }
            }
        } // lock released before invoking the sink, so it can safely re-enter the driver

        if let Some(finalization) = finalization {
            match finalization {
                Finalization::Committed(results) => {
                    info!("round {round_id} committed with {} results", results.len());
                    if let Some(sink) = self.sink.upgrade() {
                        sink.on_round_committed(&results);
                    }
                }
                Finalization::Aborted(failed_hosts) => {
                    warn!("round {round_id} aborted; failed hosts: {failed_hosts:?}");
                    if let Some(sink) = self.sink.upgrade() {
                        sink.on_round_failed(&failed_hosts);
                    }
                }
            }
        }

        Some(round_id)
    }
}
