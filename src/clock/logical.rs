//! Lamport Logical Clock

use std::sync::atomic::{AtomicU64, Ordering};

/// Scalar logical clock shared by every component of a node.
///
/// Values returned by [`tick`](Self::tick) and [`observe`](Self::observe)
/// are strictly increasing for the lifetime of the clock, and `observe`
/// always returns a value greater than the one it was given. Both saturate
/// at `u64::MAX` instead of wrapping.
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: AtomicU64,
}

impl LogicalClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at the given value
    pub fn starting_at(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    /// Current value without advancing
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Advance for a local event and return the new value
    pub fn tick(&self) -> u64 {
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |local| {
                Some(local.saturating_add(1))
            })
            .unwrap_or_else(|current| current);
        previous.saturating_add(1)
    }

    /// Merge a received value: `local = max(local, received) + 1`
    pub fn observe(&self, received: u64) -> u64 {
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |local| {
                Some(local.max(received).saturating_add(1))
            })
            .unwrap_or_else(|current| current);
        previous.max(received).saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tick_increments() {
        let clock = LogicalClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_observe_takes_max_plus_one() {
        let clock = LogicalClock::starting_at(5);
        assert_eq!(clock.observe(10), 11);
        // Older remote value still advances the clock
        assert_eq!(clock.observe(3), 12);
    }

    #[test]
    fn test_mixed_sequence_is_strictly_increasing() {
        let clock = LogicalClock::new();
        let inputs = [0u64, 7, 2, 2, 40, 1, 39, 100, 0];
        let mut last = 0;

        for (i, received) in inputs.iter().enumerate() {
            let value = if i % 3 == 0 {
                clock.tick()
            } else {
                let v = clock.observe(*received);
                assert!(v > *received, "observe({}) returned {}", received, v);
                v
            };
            assert!(value > last, "{} did not exceed {}", value, last);
            last = value;
        }
    }

    #[test]
    fn test_huge_remote_clock_saturates() {
        let clock = LogicalClock::starting_at(41);

        assert_eq!(clock.observe(u64::MAX), u64::MAX);
        assert_eq!(clock.tick(), u64::MAX);
        assert_eq!(clock.observe(7), u64::MAX);
        assert_eq!(clock.current(), u64::MAX);
    }

    #[test]
    fn test_concurrent_ticks_are_unique() {
        let clock = Arc::new(LogicalClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..250).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();

        assert_eq!(all.len(), 1000);
        assert_eq!(clock.current(), 1000);
    }
}
