//! Single-flight gate for backup passes.

use std::sync::atomic::{AtomicBool, Ordering};

/// Allows at most one backup pass at a time.
///
/// Acquiring never blocks: a caller that loses the race gets [None] and must
/// not touch snapshots, retention, mirrors or the status table.
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

/// Proof of holding the [RunGuard]. Releases it when dropped, also on unwind.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct RunPermit<'a> {
    guard: &'a RunGuard,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the guard if no pass is running.
    pub fn try_acquire(&self) -> Option<RunPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl RunPermit<'_> {
    /// Releases the guard explicitly.
    pub fn release(self) {}
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let guard = RunGuard::new();

        let permit = guard.try_acquire().expect("guard should be free");
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        permit.release();
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn released_on_panic() {
        let guard = Arc::new(RunGuard::new());

        let inner = Arc::clone(&guard);
        let result = thread::spawn(move || {
            let _permit = inner.try_acquire().unwrap();
            panic!("pass blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.is_running());
    }

    #[test]
    fn only_one_of_many_racers_wins() {
        let guard = Arc::new(RunGuard::new());
        let barrier = Arc::new(Barrier::new(8));

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    // hold on to the permit until everyone tried
                    let permit = guard.try_acquire();
                    let won = permit.is_some();
                    barrier.wait();
                    won
                })
            })
            .collect();

        let winners = racers
            .into_iter()
            .map(|racer| racer.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
