//! ═══════════════════════════════════════════════════════════════════════════════
//! THERMAL REGULATOR — Pressure Regulation with Hysteresis and Lockout
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! A bounded heat account fed by callers, watched by a five-state machine:
//!
//!   STABLE → WARMING → EMERGENCY → COOLING → STABLE
//!                          └──────→ LOCKED ──→ STABLE
//!
//! Emergencies run one recovery action at a time, spaced by a cooldown.
//! Recovery streaks escalate into exponentially longer lockouts.
//!
//! ```no_run
//! use thermal_regulator::{PressureRegulator, RegulatorConfig};
//!
//! let regulator = PressureRegulator::new(RegulatorConfig::default())?;
//! regulator.add_pressure("ingest", 0.4, "batch");
//! println!("{}", regulator.current_zone());
//! # Ok::<(), thermal_regulator::RegulatorError>(())
//! ```
//! ═══════════════════════════════════════════════════════════════════════════════

// ═══════════════════════════════════════════════════════════════════════════════
// FOUNDATION — Time, errors, configuration
// ═══════════════════════════════════════════════════════════════════════════════

pub mod config;
pub mod error;
pub mod time;

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL LOOP
// ═══════════════════════════════════════════════════════════════════════════════

pub mod events;
pub mod governor;
pub mod heat;
pub mod regulator;
pub mod state_machine;
pub mod strategy;

pub use config::RegulatorConfig;
pub use error::{ConfigError, RegulatorError, RegulatorResult, StrategyError};
pub use events::{EventLog, RecoveryEvent};
pub use governor::{CooldownGovernor, Lockout};
pub use heat::{HeatAccount, HeatBand, HistoryRing};
pub use regulator::{
    NoopObserver, PressureObserver, PressureOutcome, PressureRegulator, RegulatorBuilder, Stats,
};
pub use state_machine::{
    Evaluation, OperatingState, PressureStateMachine, RecoveryOutcome, RegulationContext, Signals,
    Transition,
};
pub use strategy::{Reading, RecoveryAction, RecoveryPlan, RecoveryStrategy, RecoveryStrategySelector};
pub use time::{Clock, ManualClock, MonotonicClock};
