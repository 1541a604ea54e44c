//! ═══════════════════════════════════════════════════════════════════════════════
//! GOVERNOR — Recovery Cooldown and Escalating Lockout
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Stops recovery storms. A recovery is allowed only once the cooldown since the
//! previous one has elapsed and no lockout is active. Repeated recoveries without
//! an intervening stable dwell escalate into exponentially longer lockouts.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::time::{Duration, Instant};

use crate::time::deadline;

/// Lockout imposed by an escalation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lockout {
    pub until: Instant,
    pub duration: Duration,
    /// Streak length that triggered it
    pub consecutive: u32,
}

/// Time-based eligibility and lockout tracking for recoveries
#[derive(Debug, Clone)]
pub struct CooldownGovernor {
    last_recovery_time: Option<Instant>,
    consecutive_recoveries: u32,
    /// `None` means no lockout has ever been set (always in the past)
    lock_until: Option<Instant>,
    total_recoveries: u64,
}

impl CooldownGovernor {
    pub fn new() -> Self {
        Self {
            last_recovery_time: None,
            consecutive_recoveries: 0,
            lock_until: None,
            total_recoveries: 0,
        }
    }

    /// True iff the cooldown since the last recovery has elapsed and no
    /// lockout is active
    pub fn is_eligible(&self, now: Instant, cooldown: Duration) -> bool {
        let cooled = match self.last_recovery_time {
            Some(last) => now.saturating_duration_since(last) >= cooldown,
            None => true,
        };
        cooled && !self.is_locked(now)
    }

    pub fn is_locked(&self, now: Instant) -> bool {
        self.lock_until.is_some_and(|until| now < until)
    }

    /// Count a recovery at `now`. Once the streak reaches `max_consecutive` a
    /// lockout of `base_lockout * multiplier^(streak - max + 1)` is set and
    /// returned; the caller must answer it with an emergency shutdown.
    pub fn record_recovery(
        &mut self,
        now: Instant,
        max_consecutive: u32,
        lockout_multiplier: f64,
        base_lockout: Duration,
    ) -> Option<Lockout> {
        self.consecutive_recoveries = self.consecutive_recoveries.saturating_add(1);
        self.total_recoveries += 1;
        self.last_recovery_time = Some(now);

        if self.consecutive_recoveries < max_consecutive {
            return None;
        }

        let exponent = (self.consecutive_recoveries - max_consecutive + 1) as i32;
        let factor = lockout_multiplier.max(1.0).powi(exponent);
        let duration = Duration::try_from_secs_f64(base_lockout.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        let until = deadline(now, duration);
        self.extend_lock(until);

        tracing::warn!(
            target: "thermal_regulator",
            consecutive = self.consecutive_recoveries,
            lockout_secs = duration.as_secs_f64(),
            "recovery streak escalated to lockout"
        );

        Some(Lockout {
            until,
            duration,
            consecutive: self.consecutive_recoveries,
        })
    }

    /// Hold the lock until at least `until`. An existing longer lock wins.
    pub fn extend_lock(&mut self, until: Instant) {
        self.lock_until = Some(match self.lock_until {
            Some(current) if current > until => current,
            _ => until,
        });
    }

    /// Reset the streak once the system has been calm since `dwell_start` for
    /// at least `min_dwell`. Returns true if the streak was reset.
    pub fn record_stability(&mut self, now: Instant, min_dwell: Duration, dwell_start: Instant) -> bool {
        if now.saturating_duration_since(dwell_start) < min_dwell {
            return false;
        }
        if self.consecutive_recoveries > 0 {
            tracing::debug!(
                target: "thermal_regulator",
                cleared = self.consecutive_recoveries,
                "recovery streak reset after stable dwell"
            );
        }
        self.consecutive_recoveries = 0;
        true
    }

    pub fn consecutive_recoveries(&self) -> u32 {
        self.consecutive_recoveries
    }

    pub fn total_recoveries(&self) -> u64 {
        self.total_recoveries
    }

    pub fn last_recovery_time(&self) -> Option<Instant> {
        self.last_recovery_time
    }

    pub fn lock_until(&self) -> Option<Instant> {
        self.lock_until
    }

    /// Time left on the lockout, zero if none
    pub fn lock_remaining(&self, now: Instant) -> Duration {
        self.lock_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Streak length at which the next recovery escalates
    pub fn next_recovery_escalates(&self, max_consecutive: u32) -> bool {
        self.consecutive_recoveries.saturating_add(1) >= max_consecutive
    }
}

impl Default for CooldownGovernor {
    fn default() -> Self {
        Self::new()
    }
}
