use std::sync::{Condvar, Mutex, MutexGuard};

/// Outstanding-work counter: every queued scan or read item is counted from
/// the moment it is dispatched until the worker that took it is done with it.
/// Zero means no work exists and none can be produced any more.
#[derive(Debug, Default)]
pub struct WorkTracker {
    outstanding: Mutex<usize>,
    cv: Condvar,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.outstanding.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, n: usize) {
        *self.lock() += n;
    }

    /// Marks one item finished and wakes the waiter when nothing is left.
    pub fn done(&self) {
        let mut guard = self.lock();
        debug_assert!(*guard > 0, "work tracker decremented below zero");
        *guard = guard.saturating_sub(1);
        if *guard == 0 {
            self.cv.notify_all();
        }
    }

    /// Guard that calls [`done`](Self::done) exactly once when dropped, so a
    /// worker cannot forget the decrement on an early return or a panic.
    pub fn finish_on_drop(&self) -> Finished<'_> {
        Finished { tracker: self }
    }

    /// Blocks until the counter reaches zero.
    pub fn wait_idle(&self) {
        let mut guard = self.lock();
        while *guard > 0 {
            guard = self.cv.wait(guard).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.lock()
    }
}

#[must_use = "dropping the guard immediately marks the item finished"]
pub struct Finished<'a> {
    tracker: &'a WorkTracker,
}

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.tracker.done();
    }
}

/// Blocking permit pool bounding how many workers do filesystem work at the
/// same time. Permits are held around a listing or a chunk read and never
/// across a queue operation, so the gate cannot participate in a deadlock
/// with queue backpressure.
#[derive(Debug)]
pub struct ExecGate {
    free: Mutex<usize>,
    cv: Condvar,
    total: usize,
}

impl ExecGate {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        ExecGate { free: Mutex::new(permits), cv: Condvar::new(), total: permits }
    }

    /// Blocks until a permit is available.
    pub fn acquire(&self) -> Permit<'_> {
        let mut guard = self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *guard == 0 {
            guard = self.cv.wait(guard).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *guard -= 1;
        Permit { gate: self }
    }

    fn release(&self) {
        let mut guard = self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = (*guard + 1).min(self.total);
        self.cv.notify_one();
    }

    pub fn permits(&self) -> usize {
        self.total
    }
}

pub struct Permit<'a> {
    gate: &'a ExecGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_idle_returns_after_last_done() {
        let tracker = WorkTracker::new();
        tracker.add(3);
        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    thread::sleep(Duration::from_millis(10));
                    let _done = tracker.finish_on_drop();
                });
            }
            tracker.wait_idle();
        });
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn guard_decrements_on_panic() {
        let tracker = WorkTracker::new();
        tracker.add(1);
        let result = thread::scope(|s| {
            s.spawn(|| {
                let _done = tracker.finish_on_drop();
                panic!("worker failure");
            })
            .join()
        });
        assert!(result.is_err());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn gate_caps_concurrency() {
        let gate = ExecGate::new(2);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let _permit = gate.acquire();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.permits(), 2);
    }
}
