//! ═══════════════════════════════════════════════════════════════════════════════
//! ERROR — Unified Error Type for the Regulator
//! ═══════════════════════════════════════════════════════════════════════════════
//! Only construction can fail. Everything at runtime degrades to a state, never
//! to an `Err` handed back to the caller.
//! ═══════════════════════════════════════════════════════════════════════════════

/// The unified error type for the regulator crate
#[derive(Debug, thiserror::Error)]
pub enum RegulatorError {
    /// Configuration rejected at construction time
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration-specific errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// An enter threshold does not sit strictly above its exit threshold
    #[error("Hysteresis violated for '{enter}'/'{exit}': enter {enter_value} must be > exit {exit_value}")]
    Hysteresis {
        enter: &'static str,
        exit: &'static str,
        enter_value: f64,
        exit_value: f64,
    },
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    /// TOML could not be parsed into a config
    #[error("Config parse failed: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Strategy-specific errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    /// Strategy returned a delta that is NaN or infinite
    #[error("Strategy '{strategy}' produced non-finite delta {delta}")]
    NonFiniteDelta { strategy: String, delta: f64 },
    /// Strategy panicked inside the call boundary
    #[error("Strategy panicked: {0}")]
    Panicked(String),
    /// Strategy refused to act
    #[error("Strategy '{strategy}' failed: {message}")]
    Failed { strategy: String, message: String },
}

/// Type alias for Result with RegulatorError
pub type RegulatorResult<T> = Result<T, RegulatorError>;
