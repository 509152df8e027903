//! Wakeups for the background threads.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Requests that accumulated since a thread last woke up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Pending {
    /// Number of notifications.
    pub(crate) count: u64,
    /// Largest size requested.
    pub(crate) size: usize,
    /// Whether the thread should exit.
    pub(crate) stop: bool,
}

/// Mutex + condvar pair a background thread sleeps on.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    state: Mutex<Pending>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a request. The thread is only woken for the first pending
    /// request, or right away when `urgent`.
    pub(crate) fn notify(&self, size: usize, urgent: bool) {
        let mut state = self.state.lock();
        state.count += 1;
        state.size = state.size.max(size);
        if state.count == 1 || urgent {
            self.cond.notify_one();
        }
    }

    /// Tells the thread to exit.
    pub(crate) fn stop(&self) {
        self.state.lock().stop = true;
        self.cond.notify_all();
    }

    /// Sleeps up to `timeout` unless something is pending, then takes all
    /// pending requests.
    pub(crate) fn wait(&self, timeout: Duration) -> Pending {
        let mut state = self.state.lock();
        if state.count == 0 && !state.stop && !timeout.is_zero() {
            self.cond.wait_for(&mut state, timeout);
        }
        let pending = *state;
        state.count = 0;
        state.size = 0;
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn pending_requests_are_merged() {
        let signal = Signal::new();
        signal.notify(10, false);
        signal.notify(500, false);
        signal.notify(20, true);

        let pending = signal.wait(Duration::from_secs(5));
        assert_eq!(pending.count, 3);
        assert_eq!(pending.size, 500);
        assert!(!pending.stop);
        assert_eq!(signal.wait(Duration::ZERO), Pending::default());
    }

    #[test]
    fn wait_times_out() {
        let signal = Signal::new();
        let start = Instant::now();
        assert_eq!(signal.wait(Duration::from_millis(20)).count, 0);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn stop_wakes_sleeper() {
        let signal = Arc::new(Signal::new());
        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(sleeper.join().unwrap().stop);
    }
}
