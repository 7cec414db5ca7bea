//! Error kinds surfaced by the engine.
//!
//! Configuration errors are raised before any derivative evaluation. Numerical
//! errors mean a solve started but could not finish; retrying with looser
//! tolerances or another method may succeed.

use thiserror::Error;

/// Invalid input detected before stepping begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown integration method `{0}`")]
    UnknownMethod(String),
    #[error("solver options were supplied without an explicit method")]
    OptionsWithoutMethod,
    #[error("{options} options cannot configure method `{method}`")]
    OptionsMismatch {
        method: &'static str,
        options: &'static str,
    },
    #[error("time sequence must contain at least one value")]
    EmptyTimes,
    #[error("time value at index {index} is not finite")]
    NonFiniteTime { index: usize },
    #[error("time sequence must be strictly monotonic; t[{index}] = {value} breaks the ordering")]
    NonMonotonicTimes { index: usize, value: f64 },
    #[error("initial state has {got} elements but the system dimension is {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("{name} has {got} elements but the state has {expected}")]
    ToleranceShape {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{name} must be finite and non-negative")]
    InvalidTolerance { name: &'static str },
    #[error("invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

/// Failure of a solve that had already started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalError {
    #[error("step size {h:e} is too small at t = {t}")]
    StepSizeTooSmall { t: f64, h: f64 },
    #[error("step rejected {rejections} times in a row at t = {t}")]
    TooManyRejections { t: f64, rejections: usize },
    #[error("exceeded the maximum of {max_steps} steps at t = {t}")]
    MaxStepsExceeded { t: f64, max_steps: usize },
    #[error("derivative returned a non-finite value at t = {t}")]
    NonFiniteDerivative { t: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Numerical(#[from] NumericalError),
}

impl SolveError {
    pub fn is_config(&self) -> bool {
        matches!(self, SolveError::Config(_))
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, SolveError::Numerical(_))
    }
}

pub(crate) fn invalid_option(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidOption {
        name,
        reason: reason.into(),
    }
}
