//! Core traits for cogmesh
//!
//! - [`Clock`]: Time abstraction for testability

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

/// Time source for timestamps and liveness decisions
///
/// Time is whole seconds since the UNIX epoch, matching the resolution of
/// the wire timestamp. Tests use [`ManualClock`] so liveness transitions
/// happen exactly when they advance it.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the UNIX epoch
    fn now_secs(&self) -> u32;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        Self {
            now: AtomicU32::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: u32) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        // 2023-11-14 or later
        assert!(SystemClock.now_secs() > 1_700_000_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_secs(), 100);
        clock.advance(5);
        assert_eq!(clock.now_secs(), 105);
        clock.set(1);
        assert_eq!(clock.now_secs(), 1);
    }
}
