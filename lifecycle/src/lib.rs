//! # Lifecycle
//!
//! Wall-clock time, deadline and timeout primitives for the policy service.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Time is read through an injected [`Clock`],
//!   never from ambient globals
//! - **Testability first**: [`ManualClock`] makes expiry and acknowledgement
//!   timeouts deterministic under test
//! - **Mechanism not policy**: Provides primitives, services decide policies
//!
//! ## Core Concepts
//!
//! - `WallTime`: Milliseconds since the Unix epoch
//! - `Deadline`: Point in time when an operation should time out
//! - `Timeout`: Duration-based timeout, converted to a deadline on use
//! - `Clock`: Source of the current wall time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallTime(u64);

impl WallTime {
    pub const EPOCH: WallTime = WallTime(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Adds a number of milliseconds, saturating at the end of time
    pub fn saturating_add(&self, millis: u64) -> WallTime {
        WallTime(self.0.saturating_add(millis))
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of the current wall time
pub trait Clock: Send + Sync {
    fn now(&self) -> WallTime;
}

/// Clock backed by the host's system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> WallTime {
        // A host clock set before 1970 reads as the epoch.
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        WallTime(millis)
    }
}

/// Clock that only moves when told to
///
/// ## Example
///
/// ```
/// use lifecycle::{Clock, ManualClock, WallTime};
///
/// let clock = ManualClock::new(WallTime::from_millis(1_000));
/// clock.advance(500);
/// assert_eq!(clock.now(), WallTime::from_millis(1_500));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: WallTime) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis()),
        }
    }

    /// Moves the clock forward
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute time
    pub fn set(&self, now: WallTime) {
        self.millis.store(now.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> WallTime {
        WallTime(self.millis.load(Ordering::SeqCst))
    }
}

/// A deadline represents a point in time when an operation should time out
///
/// Deadlines are absolute times, making them suitable for passing through
/// multiple layers without duration confusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Deadline {
    at: WallTime,
}

impl Deadline {
    /// Creates a deadline at the specified time
    pub fn at(at: WallTime) -> Self {
        Self { at }
    }

    pub fn time(&self) -> WallTime {
        self.at
    }

    /// Checks if the deadline has passed
    pub fn has_passed(&self, now: WallTime) -> bool {
        now >= self.at
    }
}

/// Timeout specifies a duration-based timeout
///
/// Unlike Deadline, Timeout is relative and needs to be converted to a
/// Deadline for actual use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    millis: u64,
}

impl Timeout {
    /// Creates a timeout from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Converts this timeout to a deadline starting from now
    pub fn to_deadline(&self, now: WallTime) -> Deadline {
        Deadline::at(now.saturating_add(self.millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_basic() {
        let now = WallTime::from_millis(1000);
        let future = WallTime::from_millis(2000);
        let deadline = Deadline::at(future);

        assert!(!deadline.has_passed(now));
        assert_eq!(deadline.time(), future);
        assert!(deadline.has_passed(WallTime::from_millis(2000)));
        assert!(deadline.has_passed(WallTime::from_millis(3000)));
    }

    #[test]
    fn test_timeout_to_deadline() {
        let now = WallTime::from_millis(1000);
        let deadline = Timeout::from_millis(100).to_deadline(now);

        assert_eq!(deadline.time(), WallTime::from_millis(1100));
        assert!(!deadline.has_passed(now));
        assert_eq!(Timeout::from_millis(5000).as_millis(), 5000);
    }

    #[test]
    fn test_timeout_saturates() {
        let deadline = Timeout::from_millis(10).to_deadline(WallTime::from_millis(u64::MAX - 1));
        assert_eq!(deadline.time(), WallTime::from_millis(u64::MAX));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(WallTime::from_millis(10));
        assert_eq!(clock.now().as_millis(), 10);
        clock.advance(5);
        assert_eq!(clock.now().as_millis(), 15);
        clock.set(WallTime::from_millis(3));
        assert_eq!(clock.now().as_millis(), 3);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a > WallTime::EPOCH);
    }
}
