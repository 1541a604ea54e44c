//! Property Tests - What must hold for every input sequence?
//!
//! Bounds, hysteresis, streak monotonicity and selector determinism.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use thermal_regulator::{
    ManualClock, OperatingState, PressureObserver, PressureRegulator, Reading, RecoveryStrategy,
    RecoveryStrategySelector, RegulatorConfig, Signals, Transition,
};

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(f64),
    Remove(f64),
    Read,
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (-1.0f64..3.0).prop_map(Op::Add),
        3 => (-1.0f64..3.0).prop_map(Op::Remove),
        1 => Just(Op::Read),
        1 => Just(Op::Tick),
    ]
}

fn step_strategy() -> impl Strategy<Value = (Op, f64, f64, u64)> {
    (op_strategy(), 0.0f64..1.0, 0.0f64..0.5, 0u64..4000)
}

fn regulator() -> (PressureRegulator, ManualClock) {
    let clock = ManualClock::new();
    let reg = PressureRegulator::builder(RegulatorConfig::default())
        .with_clock(clock.clone())
        .build()
        .unwrap();
    (reg, clock)
}

fn apply(reg: &PressureRegulator, op: Op, signals: Signals) {
    match op {
        Op::Add(amount) => {
            reg.add_pressure_with("prop", amount, "random", Some(signals));
        }
        Op::Remove(amount) => {
            reg.remove_pressure(amount, "random");
        }
        Op::Read => {
            reg.read_heat();
        }
        Op::Tick => {
            reg.tick();
        }
    }
}

proptest! {
    #[test]
    fn heat_stays_in_bounds(steps in prop::collection::vec(step_strategy(), 1..80)) {
        let (reg, clock) = regulator();
        let max_heat = reg.config().max_heat;
        for (op, coherence, drift, millis) in steps {
            clock.advance(Duration::from_millis(millis));
            apply(&reg, op, Signals::new(coherence, drift));
            let heat = reg.heat();
            prop_assert!(heat.is_finite());
            prop_assert!((0.0..=max_heat).contains(&heat), "heat {} out of bounds", heat);
        }
    }

    #[test]
    fn streak_only_resets_when_stable(steps in prop::collection::vec(step_strategy(), 1..80)) {
        let (reg, clock) = regulator();
        let max = reg.config().max_consecutive_recoveries;
        let mut previous = 0u32;
        for (op, coherence, drift, millis) in steps {
            clock.advance(Duration::from_millis(millis));
            apply(&reg, op, Signals::new(coherence, drift));
            let stats = reg.stats();
            if stats.consecutive_recoveries < previous {
                prop_assert_eq!(stats.consecutive_recoveries, 0);
                prop_assert_eq!(stats.state, OperatingState::Stable);
            }
            // a streak at the limit is always answered by a lockout
            if stats.consecutive_recoveries >= max && stats.consecutive_recoveries > previous {
                prop_assert!(stats.lock_seconds_remaining > 0.0);
            }
            previous = stats.consecutive_recoveries;
        }
    }

    #[test]
    fn selection_is_idempotent(
        heat in 0.0f64..2.0,
        coherence in 0.0f64..1.5,
        drift in 0.0f64..1.0,
    ) {
        let selector = RecoveryStrategySelector::new();
        let reading = Reading { heat, coherence, drift, exit_threshold: 0.6, max_heat: 2.0 };
        let first = selector.plan(&reading).unwrap();
        let second = selector.plan(&reading).unwrap();
        prop_assert_eq!(first, second);
        prop_assert!(first.delta.is_finite());
    }

    #[test]
    fn inverted_pairs_are_rejected(enter in 0.0f64..1.0, gap in 0.0f64..1.0) {
        let config = RegulatorConfig {
            drift_enter: enter,
            drift_exit: enter + gap,
            ..Default::default()
        };
        prop_assert!(PressureRegulator::new(config).is_err());
    }
}

#[derive(Default, Clone)]
struct TransitionLog(Arc<Mutex<Vec<Instant>>>);

impl PressureObserver for TransitionLog {
    fn on_transition(&self, transition: &Transition) {
        self.0.lock().push(transition.at);
    }
}

/// Drive heat to `target` through the public API
fn set_heat(reg: &PressureRegulator, target: f64) {
    let current = reg.heat();
    if target > current {
        reg.add_pressure("osc", target - current, "simulate");
    } else {
        reg.remove_pressure(current - target, "simulate");
    }
}

fn assert_no_flapping(log: &TransitionLog, window: Duration) {
    let stamps = log.0.lock();
    for pair in stamps.windows(2) {
        assert!(
            pair[1].saturating_duration_since(pair[0]) >= window,
            "two transitions inside one dwell window"
        );
    }
}

fn observed_regulator() -> (PressureRegulator, ManualClock, TransitionLog) {
    let log = TransitionLog::default();
    let clock = ManualClock::new();
    let reg = PressureRegulator::builder(RegulatorConfig::default())
        .with_clock(clock.clone())
        .with_observer(log.clone())
        .build()
        .unwrap();
    (reg, clock, log)
}

#[test]
fn heat_oscillation_around_warning_line_does_not_flap() {
    let (reg, clock, log) = observed_regulator();
    let line = reg.config().warn_enter;
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..500 {
        clock.advance(Duration::from_millis(rng.gen_range(10..120)));
        set_heat(&reg, line + rng.gen_range(-0.05..0.05));
    }

    assert_no_flapping(&log, reg.config().min_emergency_dwell);
    assert_eq!(reg.current_state(), OperatingState::Warming);
    assert_eq!(reg.stats().transition_count, 1);
}

#[test]
fn coherence_oscillation_does_not_flap() {
    let (reg, clock, log) = observed_regulator();
    let line = reg.config().coherence_warn_enter;
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..500 {
        clock.advance(Duration::from_millis(rng.gen_range(10..120)));
        reg.set_signals(Signals::new(line + rng.gen_range(-0.05..0.05), 0.0));
        reg.tick();
    }

    assert_no_flapping(&log, reg.config().min_emergency_dwell);
    assert!(reg.stats().transition_count <= 1);
}

#[test]
fn heat_oscillation_around_critical_line_does_not_flap() {
    let (reg, clock, log) = observed_regulator();
    let line = reg.config().crit_enter;
    let mut rng = StdRng::seed_from_u64(1234);

    for _ in 0..500 {
        clock.advance(Duration::from_millis(rng.gen_range(10..120)));
        set_heat(&reg, line + rng.gen_range(-0.05..0.05));
    }

    // emergency, lockout and release all happen, spaced by the dwell
    assert_no_flapping(&log, reg.config().min_emergency_dwell);
    assert!(log.0.lock().len() >= 3);
    assert!(reg.stats().total_recoveries >= 1);
}

#[test]
fn coherence_oscillation_around_critical_line_does_not_flap() {
    let (reg, clock, log) = observed_regulator();
    let line = reg.config().coherence_crit_enter;
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..500 {
        clock.advance(Duration::from_millis(rng.gen_range(10..120)));
        reg.set_signals(Signals::new(line + rng.gen_range(-0.05..0.05), 0.0));
        reg.tick();
    }

    assert_no_flapping(&log, reg.config().min_emergency_dwell);
    assert!(log.0.lock().len() >= 2);
}
