//! Wake signal shared by the clock and its waiters.
//!
//! A generation counter under a mutex plus a condition variable. Waiters
//! pass the generation they last observed, so a notification issued
//! between reading the clock and going to sleep is never lost.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Broadcast wake-up primitive.
#[derive(Debug, Default)]
pub struct WakeSignal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WakeSignal {
    /// New signal at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Bump the generation and wake every waiter.
    pub fn notify_all(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        let current = *generation;
        drop(generation);
        self.cond.notify_all();
        current
    }

    /// Block until the generation differs from `seen`; returns the new one.
    pub fn wait(&self, seen: u64) -> u64 {
        let mut generation = self.generation.lock();
        while *generation == seen {
            self.cond.wait(&mut generation);
        }
        *generation
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, seen: u64, timeout: Duration) -> Option<u64> {
        let mut generation = self.generation.lock();
        if *generation != seen {
            return Some(*generation);
        }
        let result = self.cond.wait_while_for(&mut generation, |g| *g == seen, timeout);
        if result.timed_out() && *generation == seen {
            None
        } else {
            Some(*generation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_before_wait_is_not_lost() {
        let signal = WakeSignal::new();
        let seen = signal.generation();
        signal.notify_all();
        assert_eq!(signal.wait(seen), seen + 1);
    }

    #[test]
    fn wait_timeout_expires_without_notify() {
        let signal = WakeSignal::new();
        assert_eq!(signal.wait_timeout(0, Duration::from_millis(5)), None);
    }

    #[test]
    fn wakes_all_waiters() {
        let signal = Arc::new(WakeSignal::new());
        let seen = signal.generation();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.wait(seen))
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        signal.notify_all();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), seen + 1);
        }
    }
}
