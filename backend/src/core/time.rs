//! Time sources for loan deadline evaluation
//!
//! The lending core has no timers. Every operation asks a [`Clock`] for the
//! current unix timestamp once, at the moment the call is made, and compares
//! it against the deadlines stored in the loan.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch
pub type Timestamp = u64;

/// Source of the current time for loan operations
pub trait Clock: Send + Sync {
    /// Current timestamp in seconds
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Manually advanced clock
///
/// Used by tests and by embedders that drive time themselves (replays,
/// scenario runs). Safe to share between threads.
///
/// # Example
/// ```
/// use p2p_lending_core_rs::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// assert_eq!(clock.now(), 1_000);
///
/// clock.advance(60);
/// assert_eq!(clock.now(), 1_060);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move time forward by `seconds`
    ///
    /// # Example
    /// ```
    /// use p2p_lending_core_rs::{Clock, ManualClock};
    ///
    /// let clock = ManualClock::new(0);
    /// clock.advance(30);
    /// clock.advance(30);
    /// assert_eq!(clock.now(), 60);
    /// ```
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp
    ///
    /// # Panics
    /// Panics if `timestamp` is earlier than the current time. Loan deadlines
    /// assume time never runs backwards; the clock keeps its reading.
    pub fn set(&self, timestamp: Timestamp) {
        let previous = self.now.fetch_max(timestamp, Ordering::SeqCst);
        assert!(
            timestamp >= previous,
            "clock cannot move backwards ({} -> {})",
            previous,
            timestamp
        );
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
