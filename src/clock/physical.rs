//! Adjustable Physical Clock
//!
//! The operating-system clock is never touched; corrections from the
//! synchronizer accumulate in an offset applied on every read.

use std::sync::atomic::{AtomicI64, Ordering};

use super::now_millis;

/// Physical clock with a correction offset in milliseconds
#[derive(Debug, Default)]
pub struct PhysicalClock {
    offset_ms: AtomicI64,
}

impl PhysicalClock {
    /// Create a clock with no correction
    pub fn new() -> Self {
        Self::default()
    }

    /// Corrected time in milliseconds since the Unix epoch
    pub fn now_ms(&self) -> i64 {
        now_millis().saturating_add(self.offset())
    }

    /// Accumulated correction
    pub fn offset(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }

    /// Apply a correction and return the new accumulated offset
    pub fn adjust(&self, delta_ms: i64) -> i64 {
        let previous = self
            .offset_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |offset| {
                Some(offset.saturating_add(delta_ms))
            })
            .unwrap_or_else(|current| current);
        let offset = previous.saturating_add(delta_ms);
        if delta_ms != 0 {
            tracing::info!("Physical clock adjusted by {} ms (offset now {} ms)", delta_ms, offset);
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_accumulates() {
        let clock = PhysicalClock::new();
        assert_eq!(clock.adjust(250), 250);
        assert_eq!(clock.adjust(-100), 150);
        assert_eq!(clock.offset(), 150);
    }

    #[test]
    fn test_now_includes_offset() {
        let clock = PhysicalClock::new();
        clock.adjust(60_000);
        let drift = clock.now_ms() - now_millis();
        assert!((59_000..=61_000).contains(&drift));
    }

    #[test]
    fn test_extreme_adjustments_saturate() {
        let clock = PhysicalClock::new();
        assert_eq!(clock.adjust(i64::MAX), i64::MAX);
        assert_eq!(clock.adjust(1), i64::MAX);
        assert_eq!(clock.now_ms(), i64::MAX);
    }
}
