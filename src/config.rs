//! ═══════════════════════════════════════════════════════════════════════════════
//! CONFIG — Thresholds, Timings and Limits
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Every enter/exit pair must leave a dead zone (enter > exit). A config that
//! would allow flapping is rejected before a regulator can be built.
//! ═══════════════════════════════════════════════════════════════════════════════

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the pressure regulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatorConfig {
    /// Upper bound of the heat account
    pub max_heat: f64,
    /// Heat shed on every read
    pub decay_rate: f64,
    /// EMA alpha for the running average
    pub ema_alpha: f64,
    /// Samples kept for volatility
    pub history_capacity: usize,

    /// Heat above which Warming is entered
    pub warn_enter: f64,
    /// Heat below which Warming is left
    pub warn_exit: f64,
    /// Heat above which Emergency is entered
    pub crit_enter: f64,
    /// Heat below which Emergency may be left
    pub crit_exit: f64,

    pub coherence_warn_enter: f64,
    pub coherence_warn_exit: f64,
    pub coherence_crit_enter: f64,
    pub coherence_crit_exit: f64,

    /// Drift above which a warning trigger fires
    pub drift_enter: f64,
    /// Drift below which Emergency may be left
    pub drift_exit: f64,

    /// Minimum spacing between recoveries; also the Cooling hold
    #[serde(with = "duration_secs")]
    pub cooldown_duration: Duration,
    /// Minimum time in Emergency before it may be left
    #[serde(with = "duration_secs")]
    pub min_emergency_dwell: Duration,
    /// Uninterrupted calm needed before the recovery streak resets
    #[serde(with = "duration_secs")]
    pub min_stable_dwell: Duration,

    /// Recoveries in a row before escalating to lockout
    pub max_consecutive_recoveries: u32,
    /// Base lockout, scaled by `lockout_multiplier` per escalation
    #[serde(with = "duration_secs")]
    pub lockout_base: Duration,
    pub lockout_multiplier: f64,

    /// Running average below which the heat band is calm
    pub band_calm_below: f64,
    /// Running average at which the heat band becomes a surge
    pub band_surge_at: f64,

    /// Recovery events kept for diagnostics
    pub event_capacity: usize,
    /// Fraction of heat shed when a strategy fails
    pub forced_cooling_fraction: f64,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            max_heat: 2.0,
            decay_rate: 0.02,
            ema_alpha: 0.1,
            history_capacity: 100,

            warn_enter: 0.7,
            warn_exit: 0.4,
            crit_enter: 1.0,
            crit_exit: 0.6,

            coherence_warn_enter: 0.6,
            coherence_warn_exit: 0.3,
            coherence_crit_enter: 0.8,
            coherence_crit_exit: 0.4,

            drift_enter: 0.3,
            drift_exit: 0.2,

            cooldown_duration: Duration::from_secs(3),
            min_emergency_dwell: Duration::from_secs(1),
            min_stable_dwell: Duration::from_secs(1),

            max_consecutive_recoveries: 3,
            lockout_base: Duration::from_secs(3),
            lockout_multiplier: 1.5,

            band_calm_below: 0.3,
            band_surge_at: 0.7,

            event_capacity: 20,
            forced_cooling_fraction: 0.1,
        }
    }
}

impl RegulatorConfig {
    /// Parse a TOML document (missing keys take defaults) and validate it
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RegulatorConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that break hysteresis or bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_heat.is_finite() || self.max_heat <= 0.0 {
            return Err(invalid("max_heat", format!("must be finite and > 0, got {}", self.max_heat)));
        }

        let pairs = [
            ("warn_enter", self.warn_enter, "warn_exit", self.warn_exit),
            ("crit_enter", self.crit_enter, "crit_exit", self.crit_exit),
            (
                "coherence_warn_enter",
                self.coherence_warn_enter,
                "coherence_warn_exit",
                self.coherence_warn_exit,
            ),
            (
                "coherence_crit_enter",
                self.coherence_crit_enter,
                "coherence_crit_exit",
                self.coherence_crit_exit,
            ),
            ("drift_enter", self.drift_enter, "drift_exit", self.drift_exit),
        ];
        for (enter, enter_value, exit, exit_value) in pairs {
            // NaN on either side also fails this comparison
            if !(enter_value > exit_value) {
                return Err(ConfigError::Hysteresis {
                    enter,
                    exit,
                    enter_value,
                    exit_value,
                });
            }
        }

        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(invalid("ema_alpha", format!("must be in (0, 1], got {}", self.ema_alpha)));
        }
        if !self.decay_rate.is_finite() || self.decay_rate < 0.0 {
            return Err(invalid("decay_rate", format!("must be >= 0, got {}", self.decay_rate)));
        }
        if self.history_capacity < 3 {
            return Err(invalid(
                "history_capacity",
                format!("must hold at least 3 samples, got {}", self.history_capacity),
            ));
        }
        if self.max_consecutive_recoveries == 0 {
            return Err(invalid("max_consecutive_recoveries", "must be >= 1".to_string()));
        }
        if !self.lockout_multiplier.is_finite() || self.lockout_multiplier < 1.0 {
            return Err(invalid(
                "lockout_multiplier",
                format!("must be >= 1, got {}", self.lockout_multiplier),
            ));
        }
        if !(self.band_calm_below >= 0.0 && self.band_calm_below < self.band_surge_at)
            || !self.band_surge_at.is_finite()
        {
            return Err(invalid(
                "band_calm_below",
                format!(
                    "must be >= 0 and below band_surge_at ({}), got {}",
                    self.band_surge_at, self.band_calm_below
                ),
            ));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be >= 1".to_string()));
        }
        if !(self.forced_cooling_fraction > 0.0 && self.forced_cooling_fraction <= 1.0) {
            return Err(invalid(
                "forced_cooling_fraction",
                format!("must be in (0, 1], got {}", self.forced_cooling_fraction),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, message: String) -> ConfigError {
    ConfigError::InvalidValue { field, message }
}

/// Durations as fractional seconds in config files
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
