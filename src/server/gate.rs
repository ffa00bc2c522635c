//! Counting semaphore with timed acquisition.
//!
//! Both scheduler stages (file preparation and engine execution) are capped
//! by one of these. Permits are released through an RAII guard so that no
//! exit path can leak one.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Gate {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Gate {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Block until a permit is free, at most `timeout`. `None` on expiry.
    pub fn acquire(&self, timeout: Duration) -> Option<GatePermit<'_>> {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap_or_else(|e| e.into_inner());
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .available
                .wait_timeout(permits, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            permits = guard;
        }
        *permits -= 1;
        Some(GatePermit { gate: self })
    }

    fn release(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(|e| e.into_inner());
        *permits += 1;
        self.available.notify_one();
    }
}

pub struct GatePermit<'a> {
    gate: &'a Gate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_up_to_capacity() {
        let gate = Gate::new(2);
        let first = gate.acquire(Duration::from_millis(10));
        let second = gate.acquire(Duration::from_millis(10));
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(gate.acquire(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_drop_releases_the_permit() {
        let gate = Gate::new(1);
        let permit = gate.acquire(Duration::from_millis(10)).unwrap();
        drop(permit);
        assert!(gate.acquire(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn test_waiter_wakes_when_a_permit_frees_up() {
        let gate = Arc::new(Gate::new(1));
        let permit = gate.acquire(Duration::from_millis(10)).unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.acquire(Duration::from_secs(5)).is_some())
        };
        thread::sleep(Duration::from_millis(50));
        drop(permit);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_timed_out_waiter_reports_failure() {
        let gate = Gate::new(1);
        let _permit = gate.acquire(Duration::from_millis(10)).unwrap();

        let started = Instant::now();
        assert!(gate.acquire(Duration::from_millis(100)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
