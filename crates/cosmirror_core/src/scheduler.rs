//! Bounded fan-out of page tasks.
//!
//! One scoped thread per admitted item. The dispatcher blocks while `ceiling`
//! tasks are in flight, so at most `ceiling` tasks ever run at once and
//! [`Scheduler::run`] returns only after every task has finished.

use std::thread;

use parking_lot::{Condvar, Mutex};

pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug)]
pub struct Scheduler {
    ceiling: usize,
    gate: Mutex<Gate>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct Gate {
    in_flight: usize,
    peak: usize,
}

/// Held by a running task; frees its admission slot when dropped, even on panic.
struct Slot<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut gate = self.scheduler.gate.lock();
        gate.in_flight -= 1;
        self.scheduler.released.notify_one();
    }
}

impl Scheduler {
    /// A ceiling of zero is treated as one.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            gate: Mutex::new(Gate::default()),
            released: Condvar::new(),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Highest number of tasks observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.gate.lock().peak
    }

    /// Runs `task` on every item and returns the results in item order.
    pub fn run<I, T, R, F>(&self, items: I, task: F) -> Vec<R>
    where
        I: IntoIterator<Item = T>,
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let task = &task;
        thread::scope(|scope| {
            let handles = items
                .into_iter()
                .map(|item| {
                    let slot = self.acquire();
                    scope.spawn(move || {
                        let _slot = slot;
                        task(item)
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn acquire(&self) -> Slot<'_> {
        let mut gate = self.gate.lock();
        while gate.in_flight >= self.ceiling {
            self.released.wait(&mut gate);
        }
        gate.in_flight += 1;
        gate.peak = gate.peak.max(gate.in_flight);
        Slot { scheduler: self }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn never_exceeds_ceiling() {
        let scheduler = Scheduler::new(3);
        let running = AtomicUsize::new(0);
        let observed = AtomicUsize::new(0);

        let results = scheduler.run(0..20, |item| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            observed.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
            item * 2
        });

        assert_eq!(results, (0..20).map(|item| item * 2).collect::<Vec<_>>());
        assert!(observed.load(Ordering::SeqCst) <= 3);
        assert!(scheduler.peak_in_flight() <= 3);
        assert!(scheduler.peak_in_flight() >= 1);
    }

    #[test]
    fn every_task_finishes_before_run_returns() {
        let scheduler = Scheduler::new(4);
        let finished = AtomicUsize::new(0);
        scheduler.run(0..32, |_| {
            thread::sleep(Duration::from_millis(1));
            finished.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(finished.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn ceiling_of_one_runs_serially() {
        let scheduler = Scheduler::new(0);
        assert_eq!(scheduler.ceiling(), 1);
        let order = Mutex::new(Vec::new());
        scheduler.run(["a", "b", "c"], |item| order.lock().push(item));
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
        assert_eq!(scheduler.peak_in_flight(), 1);
    }

    #[test]
    fn empty_input_spawns_nothing() {
        let scheduler = Scheduler::default();
        let results: Vec<()> = scheduler.run(Vec::<u8>::new(), |_| ());
        assert!(results.is_empty());
        assert_eq!(scheduler.peak_in_flight(), 0);
    }
}
