//! ═══════════════════════════════════════════════════════════════════════════════
//! STATE MACHINE — Hysteresis-Gated Pressure Regimes
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//!   Stable ──warn──▶ Warming ──crit──▶ Emergency ──exit+dwell──▶ Cooling ──hold──▶ Stable
//!     └──────────crit / compound──────────▲   │
//!                                             └──shutdown / escalation──▶ Locked ──elapsed──▶ Stable
//!
//! Enter thresholds sit above exit thresholds, so a reading hovering around
//! one line cannot flap the state. At most one transition per call, and none
//! until `min_emergency_dwell` has passed since the previous one. A lockout set
//! by recovery shows as Locked on the first evaluation after that dwell.
//!
//! The machine owns only its regime bookkeeping. Heat and governor are
//! borrowed from the regulator for the duration of one evaluation.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::RegulatorConfig;
use crate::error::StrategyError;
use crate::governor::{CooldownGovernor, Lockout};
use crate::heat::HeatAccount;
use crate::strategy::{Reading, RecoveryAction, RecoveryPlan, RecoveryStrategy, RecoveryStrategySelector};
use crate::time::deadline;

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATING STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Control regimes, exactly one active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingState {
    /// Normal operation
    Stable,
    /// Above a warning line, watching
    Warming,
    /// Active intervention
    Emergency,
    /// Post-emergency hold before returning to Stable
    Cooling,
    /// Recovery suppressed until the lockout elapses
    Locked,
}

impl OperatingState {
    pub fn name(&self) -> &'static str {
        match self {
            OperatingState::Stable => "stable",
            OperatingState::Warming => "warming",
            OperatingState::Emergency => "emergency",
            OperatingState::Cooling => "cooling",
            OperatingState::Locked => "locked",
        }
    }
}

impl std::fmt::Display for OperatingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-supplied auxiliary signals
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Signals {
    /// Strain proxy, higher is worse
    pub coherence: f64,
    /// Instability measure
    pub drift: f64,
}

impl Signals {
    pub fn new(coherence: f64, drift: f64) -> Self {
        Self { coherence, drift }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRIGGERS — Which enter conditions hold right now
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
struct Triggers {
    critical: Vec<String>,
    warnings: Vec<String>,
}

impl Triggers {
    fn assess(heat: f64, signals: Signals, config: &RegulatorConfig) -> Self {
        let mut triggers = Triggers::default();

        if heat > config.crit_enter {
            triggers.critical.push(format!("heat_critical_{:.3}", heat));
        }
        if signals.coherence > config.coherence_crit_enter {
            triggers
                .critical
                .push(format!("coherence_critical_{:.3}", signals.coherence));
        }

        if heat > config.warn_enter {
            triggers.warnings.push(format!("heat_warning_{:.3}", heat));
        }
        if signals.coherence > config.coherence_warn_enter {
            triggers
                .warnings
                .push(format!("coherence_warning_{:.3}", signals.coherence));
        }
        if signals.drift > config.drift_enter {
            triggers
                .warnings
                .push(format!("drift_warning_{:.3}", signals.drift));
        }

        triggers
    }

    /// Reason to enter Emergency, if any: a critical line or compounding warnings
    fn emergency_reason(&self) -> Option<String> {
        if let Some(first) = self.critical.first() {
            return Some(first.clone());
        }
        if self.warnings.len() >= 2 {
            return Some(format!("compound_emergency_{}", self.warnings.join("|")));
        }
        None
    }

    fn warning_reason(&self) -> Option<String> {
        self.warnings.first().cloned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVALUATION RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A state change with its cause
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: OperatingState,
    pub to: OperatingState,
    pub reason: String,
    pub at: Instant,
}

/// What a recovery attempt did
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub action: RecoveryAction,
    pub trigger_reason: String,
    /// Heat when the attempt started
    pub heat_before: f64,
    /// Signed change actually applied to heat
    pub heat_delta: f64,
    pub signals: Signals,
    /// Lockout in force after the attempt
    pub lockout: Option<Duration>,
    /// Set when this attempt pushed the streak into escalation
    pub escalation: Option<Lockout>,
    /// Set when the strategy failed and was replaced by forced cooling
    pub error: Option<StrategyError>,
}

/// Result of one evaluation
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Evaluated transition first, then a forced lockout if one was imposed
    pub transitions: Vec<Transition>,
    pub recovery: Option<RecoveryOutcome>,
}

impl Evaluation {
    pub fn transitioned(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Borrowed collaborators for a single evaluation
pub struct RegulationContext<'a> {
    pub heat: &'a mut HeatAccount,
    pub governor: &'a mut CooldownGovernor,
    pub strategy: &'a dyn RecoveryStrategy,
    pub config: &'a RegulatorConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRESSURE STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Hysteresis state machine driving recoveries
#[derive(Debug, Clone)]
pub struct PressureStateMachine {
    state: OperatingState,
    state_entry_time: Instant,
    last_emergency_at: Option<Instant>,
    transition_count: u64,
}

impl PressureStateMachine {
    pub fn new(now: Instant) -> Self {
        Self {
            state: OperatingState::Stable,
            state_entry_time: now,
            last_emergency_at: None,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> OperatingState {
        self.state
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entry_time)
    }

    pub fn last_emergency_at(&self) -> Option<Instant> {
        self.last_emergency_at
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Evaluate the current readings and act on them
    pub fn evaluate(&mut self, ctx: &mut RegulationContext<'_>, signals: Signals, now: Instant) -> Evaluation {
        let mut evaluation = Evaluation::default();
        let config = ctx.config;
        let settled = self.settled(now, config.min_emergency_dwell);

        if ctx.governor.is_locked(now) {
            if self.state != OperatingState::Locked && settled {
                evaluation
                    .transitions
                    .push(self.transition(OperatingState::Locked, "state_locked".to_string(), now));
            }
            return evaluation;
        }

        let heat = ctx.heat.value();

        match self.state {
            OperatingState::Locked => {
                if settled {
                    evaluation
                        .transitions
                        .push(self.transition(OperatingState::Stable, "lockout_elapsed".to_string(), now));
                }
            }

            OperatingState::Stable => {
                let triggers = Triggers::assess(heat, signals, config);
                if let Some(reason) = triggers.emergency_reason() {
                    if settled {
                        evaluation
                            .transitions
                            .push(self.transition(OperatingState::Emergency, reason.clone(), now));
                        evaluation.recovery = Some(self.attempt_recovery(ctx, signals, reason, now));
                    }
                } else if let Some(reason) = triggers.warning_reason() {
                    if settled {
                        evaluation
                            .transitions
                            .push(self.transition(OperatingState::Warming, reason, now));
                    }
                } else {
                    ctx.governor
                        .record_stability(now, config.min_stable_dwell, self.state_entry_time);
                }
            }

            OperatingState::Warming => {
                if !settled {
                    return evaluation;
                }
                let triggers = Triggers::assess(heat, signals, config);
                if let Some(reason) = triggers.emergency_reason() {
                    evaluation
                        .transitions
                        .push(self.transition(OperatingState::Emergency, reason.clone(), now));
                    evaluation.recovery = Some(self.attempt_recovery(ctx, signals, reason, now));
                } else if heat < config.warn_exit
                    && signals.coherence < config.coherence_warn_exit
                    && signals.drift < config.drift_exit
                {
                    evaluation
                        .transitions
                        .push(self.transition(OperatingState::Stable, "warning_cleared".to_string(), now));
                    // the dwell starts here; the streak clears on a later calm evaluation
                    ctx.governor.record_stability(now, config.min_stable_dwell, now);
                }
            }

            OperatingState::Emergency => {
                if self.emergency_exit_holds(heat, signals, config, now) {
                    evaluation
                        .transitions
                        .push(self.transition(OperatingState::Cooling, "emergency_cleared".to_string(), now));
                } else {
                    let reason = format!(
                        "emergency_persisting_heat_{:.3}_coherence_{:.3}_drift_{:.3}",
                        heat, signals.coherence, signals.drift
                    );
                    evaluation.recovery = Some(self.attempt_recovery(ctx, signals, reason, now));
                }
            }

            OperatingState::Cooling => {
                if settled && self.time_in_state(now) >= config.cooldown_duration {
                    let cooling_started = self.state_entry_time;
                    evaluation
                        .transitions
                        .push(self.transition(OperatingState::Stable, "cooldown_elapsed".to_string(), now));
                    ctx.governor
                        .record_stability(now, config.min_stable_dwell, cooling_started);
                }
            }
        }

        evaluation
    }

    /// True once the previous transition is at least `min_dwell` old. The
    /// initial state has no previous transition.
    fn settled(&self, now: Instant, min_dwell: Duration) -> bool {
        self.transition_count == 0 || self.time_in_state(now) >= min_dwell
    }

    fn emergency_exit_holds(&self, heat: f64, signals: Signals, config: &RegulatorConfig, now: Instant) -> bool {
        heat < config.crit_exit
            && signals.coherence < config.coherence_crit_exit
            && signals.drift < config.drift_exit
            && self.time_in_state(now) >= config.min_emergency_dwell
    }

    fn attempt_recovery(
        &mut self,
        ctx: &mut RegulationContext<'_>,
        signals: Signals,
        trigger_reason: String,
        now: Instant,
    ) -> RecoveryOutcome {
        let config = ctx.config;
        let heat_before = ctx.heat.value();

        if !ctx.governor.is_eligible(now, config.cooldown_duration) {
            return RecoveryOutcome {
                action: RecoveryAction::CooldownWait,
                trigger_reason,
                heat_before,
                heat_delta: 0.0,
                signals,
                lockout: None,
                escalation: None,
                error: None,
            };
        }

        let reading = Reading {
            heat: heat_before,
            coherence: signals.coherence,
            drift: signals.drift,
            exit_threshold: config.crit_exit,
            max_heat: ctx.heat.max_heat(),
        };

        let mut error = None;
        let plan = if ctx.governor.next_recovery_escalates(config.max_consecutive_recoveries) {
            RecoveryPlan {
                action: RecoveryAction::EmergencyShutdown,
                delta: RecoveryStrategySelector::delta_for(RecoveryAction::EmergencyShutdown, &reading),
            }
        } else {
            match run_strategy(ctx.strategy, &reading) {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::warn!(
                        target: "thermal_regulator",
                        strategy = ctx.strategy.name(),
                        error = %err,
                        "recovery strategy failed, forcing cooling"
                    );
                    error = Some(err);
                    RecoveryPlan {
                        action: RecoveryAction::StrategyFailed,
                        delta: -config.forced_cooling_fraction * heat_before,
                    }
                }
            }
        };

        let heat_delta = ctx.heat.apply(plan.delta, plan.action.name());
        let escalation = ctx.governor.record_recovery(
            now,
            config.max_consecutive_recoveries,
            config.lockout_multiplier,
            config.lockout_base,
        );
        if plan.action.locks() {
            ctx.governor
                .extend_lock(deadline(now, config.cooldown_duration.saturating_mul(2)));
        }
        let lockout = ctx
            .governor
            .is_locked(now)
            .then(|| ctx.governor.lock_remaining(now));

        tracing::warn!(
            target: "thermal_regulator",
            action = plan.action.name(),
            trigger = %trigger_reason,
            heat_before,
            heat_delta,
            consecutive = ctx.governor.consecutive_recoveries(),
            escalated = escalation.is_some(),
            "recovery applied"
        );

        RecoveryOutcome {
            action: plan.action,
            trigger_reason,
            heat_before,
            heat_delta,
            signals,
            lockout,
            escalation,
            error,
        }
    }

    fn transition(&mut self, to: OperatingState, reason: String, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.state_entry_time = now;
        self.transition_count += 1;
        if to == OperatingState::Emergency {
            self.last_emergency_at = Some(now);
        }
        tracing::info!(
            target: "thermal_regulator",
            from = from.name(),
            to = to.name(),
            reason = %reason,
            "state transition"
        );
        Transition { from, to, reason, at: now }
    }
}

/// Call a strategy, turning panics and non-finite deltas into errors
fn run_strategy(strategy: &dyn RecoveryStrategy, reading: &Reading) -> Result<RecoveryPlan, StrategyError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| strategy.plan(reading)));
    let plan = match outcome {
        Ok(result) => result?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            return Err(StrategyError::Panicked(message));
        }
    };
    if !plan.delta.is_finite() {
        return Err(StrategyError::NonFiniteDelta {
            strategy: strategy.name().to_string(),
            delta: plan.delta,
        });
    }
    Ok(plan)
}
