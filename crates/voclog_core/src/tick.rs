//! Tick sources.
//!
//! Ticks order markers across the whole process. The slot allocator and the
//! logfile manager receive a [`TickSource`] at construction instead of
//! reaching for global state, and recovery seeds it with the highest tick
//! found on disk.

use crate::types::{Tick, MAX_TICK};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic source of ticks.
pub trait TickSource: Send + Sync {
    /// Returns a fresh tick, strictly greater than every tick returned before.
    fn next_tick(&self) -> Tick;

    /// Returns the most recently issued tick without advancing.
    fn current_tick(&self) -> Tick;

    /// Raises the source so that future ticks are greater than `tick`.
    ///
    /// Lower values are ignored.
    fn update(&self, tick: Tick);
}

/// Atomic counter implementation of [`TickSource`].
#[derive(Debug, Default)]
pub struct TickServer {
    current: AtomicU64,
}

impl TickServer {
    /// Creates a tick server whose first tick will be `start + 1`.
    #[must_use]
    pub fn new(start: Tick) -> Self {
        Self {
            current: AtomicU64::new(start & MAX_TICK),
        }
    }
}

impl TickSource for TickServer {
    fn next_tick(&self) -> Tick {
        (self.current.fetch_add(1, Ordering::AcqRel) + 1) & MAX_TICK
    }

    fn current_tick(&self) -> Tick {
        self.current.load(Ordering::Acquire)
    }

    fn update(&self, tick: Tick) {
        self.current.fetch_max(tick & MAX_TICK, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ticks_increase() {
        let ticks = TickServer::new(0);
        let a = ticks.next_tick();
        let b = ticks.next_tick();
        assert_eq!(a, 1);
        assert!(b > a);
        assert_eq!(ticks.current_tick(), b);
    }

    #[test]
    fn update_only_raises() {
        let ticks = TickServer::new(100);
        ticks.update(50);
        assert_eq!(ticks.current_tick(), 100);
        ticks.update(500);
        assert_eq!(ticks.next_tick(), 501);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        let ticks = Arc::new(TickServer::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ticks = Arc::clone(&ticks);
                thread::spawn(move || (0..1000).map(|_| ticks.next_tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Tick> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
