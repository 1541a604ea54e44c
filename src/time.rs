//! ═══════════════════════════════════════════════════════════════════════════════
//! TIME — Monotonic Clock Source
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Why monotonic only:
//! - Cooldown, dwell and lockout are all duration comparisons
//! - Wall time can jump (NTP, manual adjustment); Instant never goes backward
//!
//! The clock is injected so tests can step time deterministically instead of
//! sleeping.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic instants
pub trait Clock: Send + Sync {
    /// Current instant (monotonic)
    fn now(&self) -> Instant;

    /// Elapsed duration since a previous instant, saturating at zero
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Production clock backed by `Instant::now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and replays.
///
/// Clones share the same timeline, so a test can keep one handle and give
/// the other to a regulator.
#[derive(Debug, Clone)]
pub struct ManualClock {
    anchor: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Move time forward by fractional seconds
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs.max(0.0)));
    }

    /// Virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.anchor + *self.offset.lock()
    }
}

/// Roughly a century; stands in for holds too long to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + hold`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline(now: Instant, hold: Duration) -> Instant {
    now.checked_add(hold)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Seconds between two instants, zero if `later` is before `earlier`
pub(crate) fn secs_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_backward() {
        let clock = MonotonicClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.elapsed_since(start), Duration::from_millis(250));
        clock.advance_secs(1.5);
        assert_eq!(clock.elapsed(), Duration::from_millis(1750));
    }

    #[test]
    fn test_manual_clock_clones_share_timeline() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        handle.advance(Duration::from_secs(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(3)), now + Duration::from_secs(3));
        let far = deadline(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(1_000_000));
    }

    #[test]
    fn test_secs_between_saturates() {
        let clock = ManualClock::new();
        let a = clock.now();
        clock.advance(Duration::from_secs(1));
        let b = clock.now();
        assert!((secs_between(a, b) - 1.0).abs() < 1e-9);
        assert_eq!(secs_between(b, a), 0.0);
    }
}
