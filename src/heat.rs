//! ═══════════════════════════════════════════════════════════════════════════════
//! HEAT — Bounded Heat Account with Decay and Rolling Statistics
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! The scalar the whole loop exists to regulate. Invariant: 0 ≤ value ≤ max_heat
//! after every mutation.
//!
//! Reads decay. `read()` sheds `decay_rate` before returning, so polling the
//! account cools it. Callers that only want to look use `value()`.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::collections::VecDeque;

use serde::Serialize;

// ═══════════════════════════════════════════════════════════════════════════════
// HISTORY RING — Fixed-capacity sample buffer
// ═══════════════════════════════════════════════════════════════════════════════

/// Last N samples in insertion order; oldest dropped first
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.samples.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.samples.back()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEAT BAND — Coarse zone from the running average
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse load band derived from the smoothed heat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatBand {
    Calm,
    Active,
    Surge,
}

impl HeatBand {
    pub fn classify(average: f64, calm_below: f64, surge_at: f64) -> Self {
        if average < calm_below {
            HeatBand::Calm
        } else if average < surge_at {
            HeatBand::Active
        } else {
            HeatBand::Surge
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HeatBand::Calm => "calm",
            HeatBand::Active => "active",
            HeatBand::Surge => "surge",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEAT ACCOUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of an invariant check after a mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvariantBreach {
    /// Value observed before clamping (may be NaN)
    pub observed: f64,
    /// Value after clamping
    pub repaired: f64,
}

/// Bounded scalar heat with passive decay and rolling statistics
#[derive(Debug, Clone)]
pub struct HeatAccount {
    value: f64,
    max_heat: f64,
    decay_rate: f64,
    ema_alpha: f64,
    history: HistoryRing<f64>,
    running_average: f64,
    /// Set once the first sample lands; the first sample seeds the average
    seeded: bool,
}

impl HeatAccount {
    pub fn new(max_heat: f64, decay_rate: f64, history_capacity: usize, ema_alpha: f64) -> Self {
        Self {
            value: 0.0,
            max_heat,
            decay_rate: decay_rate.max(0.0),
            ema_alpha: ema_alpha.clamp(f64::EPSILON, 1.0),
            history: HistoryRing::new(history_capacity),
            running_average: 0.0,
            seeded: false,
        }
    }

    /// Add heat, clamped at `max_heat`. Returns the delta actually applied.
    ///
    /// Negative or non-finite amounts apply nothing.
    pub fn add(&mut self, amount: f64, source: &str) -> f64 {
        let requested = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        let applied = requested.min((self.max_heat - self.value).max(0.0));
        self.value += applied;
        self.record_sample();
        tracing::debug!(
            target: "thermal_regulator",
            source,
            requested = amount,
            applied,
            heat = self.value,
            avg = self.running_average,
            "heat added"
        );
        applied
    }

    /// Remove heat, never below zero. Returns the amount actually removed.
    pub fn remove(&mut self, amount: f64, reason: &str) -> f64 {
        let requested = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        let removed = requested.min(self.value);
        self.value -= removed;
        self.record_sample();
        tracing::debug!(
            target: "thermal_regulator",
            reason,
            requested = amount,
            removed,
            heat = self.value,
            avg = self.running_average,
            "heat removed"
        );
        removed
    }

    /// Apply a signed delta through `add`/`remove`. Returns the signed change.
    pub fn apply(&mut self, delta: f64, label: &str) -> f64 {
        if delta >= 0.0 {
            self.add(delta, label)
        } else {
            -self.remove(-delta, label)
        }
    }

    /// Read the heat, applying one step of passive decay first.
    ///
    /// This is a mutation: every call lowers the value by `decay_rate`
    /// (floored at zero) and records a sample. Use [`HeatAccount::value`]
    /// for a side-effect-free look.
    pub fn read(&mut self) -> f64 {
        self.value = (self.value - self.decay_rate).max(0.0);
        self.record_sample();
        self.value
    }

    /// Current value without decay
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn max_heat(&self) -> f64 {
        self.max_heat
    }

    pub fn running_average(&self) -> f64 {
        self.running_average
    }

    pub fn history(&self) -> &HistoryRing<f64> {
        &self.history
    }

    /// Population standard deviation of the history, normalized by `max_heat`.
    /// Zero with fewer than 3 samples.
    pub fn volatility(&self) -> f64 {
        let n = self.history.len();
        if n < 3 {
            return 0.0;
        }
        let mean = self.history.iter().sum::<f64>() / n as f64;
        let variance = self.history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        variance.sqrt() / self.max_heat
    }

    /// Verify 0 ≤ value ≤ max_heat. Out-of-range or NaN values are clamped
    /// and reported.
    pub fn enforce_bounds(&mut self) -> Option<InvariantBreach> {
        let observed = self.value;
        if observed.is_finite() && (0.0..=self.max_heat).contains(&observed) {
            return None;
        }
        let repaired = if observed.is_nan() {
            self.running_average.clamp(0.0, self.max_heat)
        } else {
            observed.clamp(0.0, self.max_heat)
        };
        self.value = repaired;
        if !self.running_average.is_finite() {
            self.running_average = repaired;
        }
        Some(InvariantBreach { observed, repaired })
    }

    fn record_sample(&mut self) {
        self.history.push(self.value);
        if self.seeded {
            self.running_average =
                self.ema_alpha * self.value + (1.0 - self.ema_alpha) * self.running_average;
        } else {
            self.running_average = self.value;
            self.seeded = true;
        }
    }

    #[cfg(test)]
    pub(crate) fn force_value(&mut self, value: f64) {
        self.value = value;
    }
}
