//! Clock Module
//!
//! Logical (Lamport) clock, adjustable physical clock and the
//! Berkeley-style synchronizer that keeps physical clocks aligned
//! with the coordinator.

mod logical;
mod physical;
mod sync;

pub use logical::LogicalClock;
pub use physical::PhysicalClock;
pub use sync::{ClockSyncConfig, ClockSynchronizer, SyncRound};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
