//! `Results`: a thread-safe first-writer-wins result map plus a join
//! sink for supervisor threads, implemented as a plain queue rather than
//! relying on language-specific finalizers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::JoinHandle;

use log::warn;

/// `(exit_code, epoch_seconds)` recorded for one worker.
pub type WorkerOutcome = (i32, u64);

#[derive(Default)]
pub struct Results {
    values: Mutex<HashMap<String, WorkerOutcome>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a supervisor thread handle that `get_results` must join.
    pub fn expect(&self, handle: JoinHandle<()>) {
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
    }

    /// Inserts `value` under `key` iff the key is absent.
    pub fn add_result(&self, key: String, value: WorkerOutcome) {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.entry(key).or_insert(value);
    }

    /// Drains the handle queue, joining each, and returns a snapshot of
    /// the results collected so far.
    ///
    /// Callable only after the driver's `finished()` holds — joining
    /// supervisors before all of them are queued would otherwise race
    /// with `start`/`resume` still spawning new ones.
    pub fn get_results(&self) -> HashMap<String, WorkerOutcome> {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for handle in handles {
            if let Err(e) = handle.join() {
                warn!("supervisor thread panicked: {e:?}");
            }
        }
        self.values.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let results = Results::new();
        results.add_result("h1[0]".into(), (0, 100));
        results.add_result("h1[0]".into(), (1, 200));
        let snapshot = results.get_results();
        assert_eq!(snapshot.get("h1[0]"), Some(&(0, 100)));
    }

    #[test]
    fn joins_queued_handles() {
        let results = Results::new();
        let handle = std::thread::spawn(|| {});
        results.expect(handle);
        results.add_result("h1[0]".into(), (0, 1));
        let snapshot = results.get_results();
        assert_eq!(snapshot.len(), 1);
    }
}
