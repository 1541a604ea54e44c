//! ═══════════════════════════════════════════════════════════════════════════════
//! REGULATOR — Thread-Safe Facade over the Control Loop
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! One lock, one critical section per call:
//!   lock → mutate heat → check bounds → evaluate state machine → recover → unlock
//!
//! Heat, governor, regime and event log change together or not at all, so no
//! caller ever observes a heat value paired with a stale state. Observers are
//! notified after the lock is released.
//!
//! Nothing here returns an error at runtime. Construction is the only fallible
//! step.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::RegulatorConfig;
use crate::error::RegulatorResult;
use crate::events::{EventLog, RecoveryEvent};
use crate::governor::CooldownGovernor;
use crate::heat::{HeatAccount, HeatBand};
use crate::state_machine::{
    Evaluation, OperatingState, PressureStateMachine, RecoveryOutcome, RegulationContext, Signals, Transition,
};
use crate::strategy::{RecoveryAction, RecoveryStrategy, RecoveryStrategySelector};
use crate::time::{deadline, secs_between, Clock, MonotonicClock};

/// Most events `stats()` will report
pub const STATS_EVENT_LIMIT: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// OBSERVER HOOK
// ═══════════════════════════════════════════════════════════════════════════════

/// Optional notifications. Both methods default to no-ops.
pub trait PressureObserver: Send + Sync {
    fn on_transition(&self, _transition: &Transition) {}

    fn on_recovery(&self, _outcome: &RecoveryOutcome) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PressureObserver for NoopObserver {}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Detailed result of one pressure change
#[derive(Debug, Clone)]
pub struct PressureOutcome {
    /// Pressure admitted after clamping (negative for removals)
    pub pressure_delta: f64,
    /// Heat change made by recovery, zero if none
    pub recovery_delta: f64,
    /// Net heat change of the whole call
    pub applied: f64,
    pub state: OperatingState,
    pub recovery: Option<RecoveryOutcome>,
    pub transitions: Vec<Transition>,
}

/// Point-in-time diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub state: OperatingState,
    pub consecutive_recoveries: u32,
    pub total_recoveries: u64,
    /// None until the first emergency
    pub seconds_since_last_emergency: Option<f64>,
    pub lock_seconds_remaining: f64,
    pub time_in_state_secs: f64,
    pub heat: f64,
    pub running_average: f64,
    pub volatility: f64,
    pub heat_band: HeatBand,
    pub transition_count: u64,
    pub recent_events: Vec<RecoveryEvent>,
}

impl Stats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGULATOR
// ═══════════════════════════════════════════════════════════════════════════════

struct Inner {
    heat: HeatAccount,
    governor: CooldownGovernor,
    machine: PressureStateMachine,
    events: EventLog,
    signals: Signals,
}

/// Notifications collected under the lock, delivered after it
struct Pending {
    transitions: Vec<Transition>,
    recovery: Option<RecoveryOutcome>,
}

/// The pressure regulation loop
pub struct PressureRegulator {
    config: RegulatorConfig,
    clock: Arc<dyn Clock>,
    strategy: Box<dyn RecoveryStrategy>,
    observer: Box<dyn PressureObserver>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PressureRegulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureRegulator")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .field("state", &self.current_state())
            .finish()
    }
}

/// Builder for [`PressureRegulator`]
pub struct RegulatorBuilder {
    config: RegulatorConfig,
    clock: Arc<dyn Clock>,
    strategy: Box<dyn RecoveryStrategy>,
    observer: Box<dyn PressureObserver>,
}

impl RegulatorBuilder {
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_strategy<S: RecoveryStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    pub fn with_observer<O: PressureObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Validate the config and build the regulator
    pub fn build(self) -> RegulatorResult<PressureRegulator> {
        self.config.validate()?;
        let now = self.clock.now();
        let config = self.config;
        let inner = Inner {
            heat: HeatAccount::new(config.max_heat, config.decay_rate, config.history_capacity, config.ema_alpha),
            governor: CooldownGovernor::new(),
            machine: PressureStateMachine::new(now),
            events: EventLog::new(config.event_capacity, now),
            signals: Signals::default(),
        };
        tracing::debug!(
            target: "thermal_regulator",
            max_heat = config.max_heat,
            strategy = self.strategy.name(),
            "regulator initialized"
        );
        Ok(PressureRegulator {
            config,
            clock: self.clock,
            strategy: self.strategy,
            observer: self.observer,
            inner: Mutex::new(inner),
        })
    }
}

impl PressureRegulator {
    /// Regulator with the monotonic clock, default strategy and no observer
    pub fn new(config: RegulatorConfig) -> RegulatorResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: RegulatorConfig) -> RegulatorBuilder {
        RegulatorBuilder {
            config,
            clock: Arc::new(MonotonicClock),
            strategy: Box::new(RecoveryStrategySelector::new()),
            observer: Box::new(NoopObserver),
        }
    }

    pub fn config(&self) -> &RegulatorConfig {
        &self.config
    }

    /// Add pressure using the last supplied signals. Returns the net heat
    /// change, including any recovery it set off.
    pub fn add_pressure(&self, source: &str, amount: f64, context: &str) -> f64 {
        self.add_pressure_with(source, amount, context, None).applied
    }

    /// Add pressure, optionally replacing the stored signals first
    pub fn add_pressure_with(
        &self,
        source: &str,
        amount: f64,
        context: &str,
        signals: Option<Signals>,
    ) -> PressureOutcome {
        let (outcome, pending) = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            if let Some(signals) = signals {
                inner.signals = signals;
            }
            let pressure_delta = inner.heat.add(amount, source);
            tracing::trace!(target: "thermal_regulator", source, context, "pressure admitted");
            self.settle(&mut inner, pressure_delta, now)
        };
        self.notify(pending);
        outcome
    }

    /// Remove heat. Returns the amount actually removed.
    pub fn remove_pressure(&self, amount: f64, reason: &str) -> f64 {
        let (outcome, pending) = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            let removed = inner.heat.remove(amount, reason);
            self.settle(&mut inner, -removed, now)
        };
        self.notify(pending);
        -outcome.pressure_delta
    }

    /// Replace the caller-supplied coherence and drift
    pub fn set_signals(&self, signals: Signals) {
        self.inner.lock().signals = signals;
    }

    pub fn signals(&self) -> Signals {
        self.inner.lock().signals
    }

    /// Re-evaluate without changing pressure (lets Cooling and Locked expire)
    pub fn tick(&self) -> OperatingState {
        let (outcome, pending) = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            self.settle(&mut inner, 0.0, now)
        };
        self.notify(pending);
        outcome.state
    }

    /// Read heat through the account, applying one step of passive decay.
    /// See [`HeatAccount::read`]; use [`PressureRegulator::heat`] to look
    /// without cooling. Does not evaluate; a bounds repair made here locks
    /// the regulator and shows as Locked on the next evaluation.
    pub fn read_heat(&self) -> f64 {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let value = inner.heat.read();
        self.check_invariants(&mut inner, now);
        value
    }

    /// Heat without decay
    pub fn heat(&self) -> f64 {
        self.inner.lock().heat.value()
    }

    pub fn current_state(&self) -> OperatingState {
        self.inner.lock().machine.state()
    }

    /// `"stable" | "warming" | "emergency" | "cooling" | "locked"`
    pub fn current_zone(&self) -> &'static str {
        self.current_state().name()
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock();
        let now = self.clock.now();
        Stats {
            state: inner.machine.state(),
            consecutive_recoveries: inner.governor.consecutive_recoveries(),
            total_recoveries: inner.governor.total_recoveries(),
            seconds_since_last_emergency: inner.machine.last_emergency_at().map(|at| secs_between(at, now)),
            lock_seconds_remaining: inner.governor.lock_remaining(now).as_secs_f64(),
            time_in_state_secs: inner.machine.time_in_state(now).as_secs_f64(),
            heat: inner.heat.value(),
            running_average: inner.heat.running_average(),
            volatility: inner.heat.volatility(),
            heat_band: HeatBand::classify(
                inner.heat.running_average(),
                self.config.band_calm_below,
                self.config.band_surge_at,
            ),
            transition_count: inner.machine.transition_count(),
            recent_events: inner.events.recent(STATS_EVENT_LIMIT),
        }
    }

    /// Bounds check, evaluation and bookkeeping shared by every mutating call
    fn settle(&self, inner: &mut Inner, pressure_delta: f64, now: Instant) -> (PressureOutcome, Pending) {
        self.check_invariants(inner, now);

        let signals = inner.signals;
        let Inner {
            heat,
            governor,
            machine,
            events,
            ..
        } = &mut *inner;
        let mut ctx = RegulationContext {
            heat,
            governor,
            strategy: self.strategy.as_ref(),
            config: &self.config,
        };
        let Evaluation { transitions, recovery } = machine.evaluate(&mut ctx, signals, now);

        if let Some(outcome) = &recovery {
            if outcome.action != RecoveryAction::CooldownWait {
                events.record_outcome(outcome, now);
            }
        }
        let pending = Pending {
            transitions: transitions.clone(),
            recovery: recovery.clone(),
        };

        self.check_invariants(inner, now);

        let recovery_delta = recovery.as_ref().map(|r| r.heat_delta).unwrap_or(0.0);
        let outcome = PressureOutcome {
            pressure_delta,
            recovery_delta,
            applied: pressure_delta + recovery_delta,
            state: inner.machine.state(),
            recovery,
            transitions,
        };
        (outcome, pending)
    }

    /// Clamp heat back into bounds if anything pushed it out, and lock
    fn check_invariants(&self, inner: &mut Inner, now: Instant) {
        let Some(breach) = inner.heat.enforce_bounds() else {
            return;
        };
        tracing::warn!(
            target: "thermal_regulator",
            observed = breach.observed,
            repaired = breach.repaired,
            "heat invariant violated, clamped and locking"
        );
        let delta = if breach.observed.is_finite() {
            breach.repaired - breach.observed
        } else {
            0.0
        };
        let signals = inner.signals;
        inner.events.record(
            now,
            format!("state_invariant_violation_{}", breach.observed),
            breach.repaired,
            signals,
            RecoveryAction::InvariantRepair,
            delta,
        );
        // the machine moves to Locked on its next evaluation
        inner
            .governor
            .extend_lock(deadline(now, self.config.lockout_base));
    }

    fn notify(&self, pending: Pending) {
        for transition in &pending.transitions {
            self.observer.on_transition(transition);
        }
        if let Some(outcome) = &pending.recovery {
            self.observer.on_recovery(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use std::time::Duration;

    fn regulator() -> (PressureRegulator, ManualClock) {
        let clock = ManualClock::new();
        let regulator = PressureRegulator::builder(RegulatorConfig::default())
            .with_clock(clock.clone())
            .build()
            .unwrap();
        (regulator, clock)
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let config = RegulatorConfig {
            warn_enter: 0.3,
            ..Default::default()
        };
        assert!(PressureRegulator::new(config).is_err());
    }

    #[test]
    fn test_small_pressure_stays_stable() {
        let (reg, _clock) = regulator();
        assert_eq!(reg.add_pressure("x", 0.3, "idle"), 0.3);
        assert_eq!(reg.current_zone(), "stable");
        assert!(reg.stats().recent_events.is_empty());
    }

    #[test]
    fn test_warming_zone() {
        let (reg, clock) = regulator();
        reg.add_pressure("x", 0.8, "load");
        assert_eq!(reg.current_zone(), "warming");
        clock.advance_secs(1.0);
        assert_eq!(reg.remove_pressure(0.5, "relief"), 0.5);
        assert_eq!(reg.current_zone(), "stable");
    }

    #[test]
    fn test_critical_add_returns_net_delta() {
        let (reg, _clock) = regulator();
        let outcome = reg.add_pressure_with("x", 1.1, "burst", None);
        assert!((outcome.pressure_delta - 1.1).abs() < 1e-12);
        assert!((outcome.recovery_delta - -0.55).abs() < 1e-9);
        assert!((outcome.applied - 0.55).abs() < 1e-9);
        assert_eq!(outcome.state, OperatingState::Emergency);
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(reg.current_zone(), "emergency");

        let stats = reg.stats();
        assert_eq!(stats.recent_events.len(), 1);
        assert_eq!(stats.recent_events[0].action, "emergency_shutdown");
        assert!(stats.lock_seconds_remaining > 5.9);
        assert_eq!(stats.seconds_since_last_emergency, Some(0.0));
    }

    #[test]
    fn test_tick_releases_lock() {
        let (reg, clock) = regulator();
        reg.add_pressure("x", 1.1, "burst");
        assert_eq!(reg.tick(), OperatingState::Emergency);
        clock.advance(Duration::from_secs(1));
        assert_eq!(reg.tick(), OperatingState::Locked);
        clock.advance(Duration::from_secs(5));
        assert_eq!(reg.tick(), OperatingState::Stable);
    }

    #[test]
    fn test_clamped_config_durations_never_panic() {
        let config = RegulatorConfig::from_toml_str("cooldown_duration = 1.0e19\nlockout_base = 1.0e19\n").unwrap();
        let clock = ManualClock::new();
        let reg = PressureRegulator::builder(config)
            .with_clock(clock.clone())
            .build()
            .unwrap();
        for _ in 0..4 {
            reg.add_pressure("x", 1.1, "burst");
            clock.advance_secs(2.0);
        }
        assert_eq!(reg.current_zone(), "locked");
        assert!(reg.stats().lock_seconds_remaining > 1.0e9);
    }

    #[test]
    fn test_heat_band_uses_band_edges() {
        let (reg, _clock) = regulator();
        reg.add_pressure("x", 0.35, "load");
        assert_eq!(reg.stats().heat_band, HeatBand::Active);

        let config = RegulatorConfig {
            band_calm_below: 0.5,
            ..Default::default()
        };
        let reg = PressureRegulator::new(config).unwrap();
        reg.add_pressure("x", 0.35, "load");
        assert_eq!(reg.stats().heat_band, HeatBand::Calm);
    }

    #[test]
    fn test_read_heat_decays() {
        let (reg, _clock) = regulator();
        reg.add_pressure("x", 0.5, "load");
        assert!((reg.read_heat() - 0.48).abs() < 1e-12);
        assert!((reg.heat() - 0.48).abs() < 1e-12);
    }

    #[test]
    fn test_invariant_violation_locks() {
        let (reg, _clock) = regulator();
        reg.add_pressure("x", 0.5, "load");
        reg.inner.lock().heat.force_value(f64::NAN);
        reg.tick();
        let stats = reg.stats();
        assert_eq!(stats.state, OperatingState::Locked);
        assert!(stats.heat.is_finite());
        assert_eq!(stats.recent_events[0].action, "invariant_repair");
    }

    #[test]
    fn test_stats_serialize() {
        let (reg, _clock) = regulator();
        reg.add_pressure("x", 1.1, "burst");
        let json = reg.stats().to_json().unwrap();
        assert!(json.contains("\"state\": \"emergency\""));
        assert!(json.contains("emergency_shutdown"));
        assert!(json.contains("\"heat_band\""));
    }
}
