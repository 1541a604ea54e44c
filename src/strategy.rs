//! ═══════════════════════════════════════════════════════════════════════════════
//! STRATEGY — Recovery Action Selection
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Given a reading, pick one corrective action and the heat delta it implies.
//! Not every recovery cools: stabilization work has a small heat cost of its own.
//!
//! Priority table (first match wins):
//!   1. heat < 2·max/5 and coherence < 0.9  → GentleCooling
//!   2. drift > 0.2                          → AlignmentStabilization
//!   3. coherence > 0.8                      → EntropyRegulation
//!   4. otherwise                            → EmergencyShutdown
//!
//! Strategies are pure. Heat is only ever changed by the regulator.
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::Serialize;

use crate::error::StrategyError;

/// Corrective actions the regulator can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Shed a bounded share of the excess heat
    GentleCooling,
    /// Small heat cost to correct drift
    AlignmentStabilization,
    /// Small heat cost to regulate high coherence strain
    EntropyRegulation,
    /// Halve the heat and lock the regulator
    EmergencyShutdown,
    /// Strategy failed; minimal forced cooling was applied instead
    StrategyFailed,
    /// Recovery skipped, cooldown still running
    CooldownWait,
    /// Heat left its bounds and was clamped
    InvariantRepair,
}

impl RecoveryAction {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryAction::GentleCooling => "gentle_cooling",
            RecoveryAction::AlignmentStabilization => "alignment_stabilization",
            RecoveryAction::EntropyRegulation => "entropy_regulation",
            RecoveryAction::EmergencyShutdown => "emergency_shutdown",
            RecoveryAction::StrategyFailed => "strategy_failed",
            RecoveryAction::CooldownWait => "cooldown_wait",
            RecoveryAction::InvariantRepair => "invariant_repair",
        }
    }

    /// Does this action remove heat?
    pub fn is_cooling(&self) -> bool {
        matches!(
            self,
            RecoveryAction::GentleCooling
                | RecoveryAction::EmergencyShutdown
                | RecoveryAction::StrategyFailed
        )
    }

    /// Does this action force the regulator into lockout?
    pub fn locks(&self) -> bool {
        matches!(
            self,
            RecoveryAction::EmergencyShutdown | RecoveryAction::StrategyFailed
        )
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to a strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub heat: f64,
    pub coherence: f64,
    pub drift: f64,
    /// Heat the regulator is trying to get back under (crit_exit)
    pub exit_threshold: f64,
    pub max_heat: f64,
}

/// A chosen action and the delta it applies to heat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryPlan {
    pub action: RecoveryAction,
    pub delta: f64,
}

/// A recovery policy. Implementations must be deterministic and must not
/// touch shared state; the regulator catches errors and panics at the call.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn plan(&self, reading: &Reading) -> Result<RecoveryPlan, StrategyError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRIORITY TABLE — The default selector
// ═══════════════════════════════════════════════════════════════════════════════

const GENTLE_COHERENCE_LIMIT: f64 = 0.9;
const GENTLE_FRACTION: f64 = 0.3;
const GENTLE_MAX: f64 = 0.5;

const ALIGNMENT_DRIFT_TRIGGER: f64 = 0.2;
const ALIGNMENT_BASE: f64 = 0.1;
const ALIGNMENT_GAIN: f64 = 0.2;
const ALIGNMENT_MAX: f64 = 0.3;

const ENTROPY_COHERENCE_TRIGGER: f64 = 0.8;
const ENTROPY_BASE: f64 = 0.05;
const ENTROPY_GAIN: f64 = 0.1;
const ENTROPY_MAX: f64 = 0.15;

const SHUTDOWN_FRACTION: f64 = 0.5;

/// Heat below which gentle cooling is preferred over shutdown
pub fn gentle_ceiling(max_heat: f64) -> f64 {
    2.0 * max_heat / 5.0
}

/// Deterministic priority-table strategy selection
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryStrategySelector;

impl RecoveryStrategySelector {
    pub fn new() -> Self {
        Self
    }

    /// Pick an action for the reading (first match wins)
    pub fn select(&self, reading: &Reading) -> RecoveryAction {
        if reading.heat < gentle_ceiling(reading.max_heat) && reading.coherence < GENTLE_COHERENCE_LIMIT {
            RecoveryAction::GentleCooling
        } else if reading.drift > ALIGNMENT_DRIFT_TRIGGER {
            RecoveryAction::AlignmentStabilization
        } else if reading.coherence > ENTROPY_COHERENCE_TRIGGER {
            RecoveryAction::EntropyRegulation
        } else {
            RecoveryAction::EmergencyShutdown
        }
    }

    /// Heat delta for an action at this reading
    pub fn delta_for(action: RecoveryAction, reading: &Reading) -> f64 {
        match action {
            RecoveryAction::GentleCooling => {
                let excess = reading.heat - reading.exit_threshold;
                (-(GENTLE_FRACTION * excess).min(GENTLE_MAX)).min(0.0)
            }
            RecoveryAction::AlignmentStabilization => {
                (ALIGNMENT_BASE + ALIGNMENT_GAIN * reading.drift).min(ALIGNMENT_MAX)
            }
            RecoveryAction::EntropyRegulation => {
                (ENTROPY_BASE + ENTROPY_GAIN * reading.coherence).min(ENTROPY_MAX)
            }
            RecoveryAction::EmergencyShutdown => -SHUTDOWN_FRACTION * reading.heat.max(0.0),
            RecoveryAction::StrategyFailed
            | RecoveryAction::CooldownWait
            | RecoveryAction::InvariantRepair => 0.0,
        }
    }
}

impl RecoveryStrategy for RecoveryStrategySelector {
    fn name(&self) -> &str {
        "priority_table"
    }

    fn plan(&self, reading: &Reading) -> Result<RecoveryPlan, StrategyError> {
        let action = self.select(reading);
        let delta = Self::delta_for(action, reading);
        if !delta.is_finite() {
            return Err(StrategyError::NonFiniteDelta {
                strategy: self.name().to_string(),
                delta,
            });
        }
        Ok(RecoveryPlan { action, delta })
    }
}
