//! Method identifiers, per-family options and solver construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{invalid_option, ConfigError, NumericalError};
use crate::interpolate::StepRecord;
use crate::solvers::controller::StepController;
use crate::solvers::tableau::{DORMAND_PRINCE, TSITOURAS};
use crate::solvers::{
    AdaptiveRkConfig, AdaptiveRkSolver, FixedAdamsSolver, FixedGridScheme, FixedGridSolver,
    VariableAdamsConfig, VariableAdamsSolver, MAX_ADAMS_ORDER,
};
use crate::tolerance::{ErrorMixer, ErrorNorm, Tolerance};
use crate::traits::{OdeSystem, Scalar, SolveStats, Stepper};

/// The closed set of integration methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    ExplicitAdams,
    AdamsMoulton,
    VariableAdams,
    Tsit5,
    #[default]
    Dopri5,
    Euler,
    Midpoint,
    Rk4,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::ExplicitAdams,
        Method::AdamsMoulton,
        Method::VariableAdams,
        Method::Tsit5,
        Method::Dopri5,
        Method::Euler,
        Method::Midpoint,
        Method::Rk4,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::ExplicitAdams => "explicit-adams",
            Method::AdamsMoulton => "adams-moulton",
            Method::VariableAdams => "variable-adams",
            Method::Tsit5 => "tsit5",
            Method::Dopri5 => "dopri5",
            Method::Euler => "euler",
            Method::Midpoint => "midpoint",
            Method::Rk4 => "rk4",
        }
    }

    /// Name of the option family this method accepts.
    pub fn options_family(self) -> &'static str {
        match self {
            Method::Euler | Method::Midpoint | Method::Rk4 => FixedGridOptions::FAMILY,
            Method::ExplicitAdams | Method::AdamsMoulton => FixedAdamsOptions::FAMILY,
            Method::Dopri5 | Method::Tsit5 => AdaptiveOptions::FAMILY,
            Method::VariableAdams => VariableAdamsOptions::FAMILY,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| ConfigError::UnknownMethod(s.to_string()))
    }
}

const DEFAULT_FIXED_MAX_STEPS: usize = 1_000_000;
const DEFAULT_ADAPTIVE_MAX_STEPS: usize = 100_000;

fn check_positive(name: &'static str, value: Option<f64>) -> Result<(), ConfigError> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(invalid_option(name, "must be finite and positive")),
        _ => Ok(()),
    }
}

fn check_max_steps(max_steps: usize) -> Result<(), ConfigError> {
    if max_steps == 0 {
        return Err(invalid_option("max_steps", "must be at least 1"));
    }
    Ok(())
}

fn check_max_order(max_order: usize) -> Result<(), ConfigError> {
    if !(1..=MAX_ADAMS_ORDER).contains(&max_order) {
        return Err(invalid_option(
            "max_order",
            format!("must lie in 1..={MAX_ADAMS_ORDER}"),
        ));
    }
    Ok(())
}

/// Options for euler, midpoint and rk4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixedGridOptions {
    /// Constant step. Without it the solver steps between requested times.
    pub step_size: Option<f64>,
    pub max_steps: usize,
}

impl Default for FixedGridOptions {
    fn default() -> Self {
        Self {
            step_size: None,
            max_steps: DEFAULT_FIXED_MAX_STEPS,
        }
    }
}

impl FixedGridOptions {
    const FAMILY: &'static str = "fixed-grid";

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("step_size", self.step_size)?;
        check_max_steps(self.max_steps)
    }
}

/// Options for explicit-adams and adams-moulton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixedAdamsOptions {
    pub step_size: Option<f64>,
    /// Order of the Adams-Bashforth predictor.
    pub max_order: usize,
    pub max_steps: usize,
}

impl Default for FixedAdamsOptions {
    fn default() -> Self {
        Self {
            step_size: None,
            max_order: 4,
            max_steps: DEFAULT_FIXED_MAX_STEPS,
        }
    }
}

impl FixedAdamsOptions {
    const FAMILY: &'static str = "fixed-adams";

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("step_size", self.step_size)?;
        check_max_order(self.max_order)?;
        check_max_steps(self.max_steps)
    }
}

/// Step size control shared by the adaptive families.
fn validate_control(
    first_step: Option<f64>,
    safety: f64,
    ifactor: f64,
    dfactor: f64,
    min_step: f64,
    max_step: Option<f64>,
    max_steps: usize,
) -> Result<(), ConfigError> {
    check_positive("first_step", first_step)?;
    if !(safety > 0.0 && safety <= 1.0) {
        return Err(invalid_option("safety", "must lie in (0, 1]"));
    }
    if !(ifactor.is_finite() && ifactor >= 1.0) {
        return Err(invalid_option("ifactor", "must be finite and at least 1"));
    }
    if !(dfactor > 0.0 && dfactor <= 1.0) {
        return Err(invalid_option("dfactor", "must lie in (0, 1]"));
    }
    if !(min_step.is_finite() && min_step >= 0.0) {
        return Err(invalid_option("min_step", "must be finite and non-negative"));
    }
    if let Some(max) = max_step {
        if max.is_nan() || max <= 0.0 || max < min_step {
            return Err(invalid_option("max_step", "must be positive and not below min_step"));
        }
    }
    check_max_steps(max_steps)
}

/// Options for dopri5 and tsit5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveOptions {
    /// Size of the first step; chosen automatically when unset.
    pub first_step: Option<f64>,
    pub safety: f64,
    /// Largest growth factor per step.
    pub ifactor: f64,
    /// Smallest shrink factor per step.
    pub dfactor: f64,
    /// Weight of the previous error in the PI controller.
    pub beta: f64,
    pub min_step: f64,
    pub max_step: Option<f64>,
    pub max_steps: usize,
    /// Consecutive rejections tolerated within one step.
    pub max_rejections: usize,
    pub norm: ErrorNorm,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            first_step: None,
            safety: 0.9,
            ifactor: 10.0,
            dfactor: 0.2,
            beta: 0.04,
            min_step: 0.0,
            max_step: None,
            max_steps: DEFAULT_ADAPTIVE_MAX_STEPS,
            max_rejections: 50,
            norm: ErrorNorm::Rms,
        }
    }
}

impl AdaptiveOptions {
    const FAMILY: &'static str = "adaptive";

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_control(
            self.first_step,
            self.safety,
            self.ifactor,
            self.dfactor,
            self.min_step,
            self.max_step,
            self.max_steps,
        )?;
        if !(0.0..0.2).contains(&self.beta) {
            return Err(invalid_option("beta", "must lie in [0, 0.2)"));
        }
        Ok(())
    }

    fn controller(&self) -> StepController {
        StepController::new(
            self.safety,
            self.ifactor,
            self.dfactor,
            self.beta,
            self.min_step,
            self.max_step.unwrap_or(f64::INFINITY),
        )
    }
}

/// Options for variable-adams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariableAdamsOptions {
    /// Correct with Adams-Moulton (PECE); otherwise accept the prediction.
    pub implicit: bool,
    pub max_order: usize,
    pub first_step: Option<f64>,
    pub safety: f64,
    pub ifactor: f64,
    pub dfactor: f64,
    pub min_step: f64,
    pub max_step: Option<f64>,
    pub max_steps: usize,
    pub max_rejections: usize,
    pub norm: ErrorNorm,
}

impl Default for VariableAdamsOptions {
    fn default() -> Self {
        Self {
            implicit: true,
            max_order: MAX_ADAMS_ORDER,
            first_step: None,
            safety: 0.9,
            ifactor: 2.0,
            dfactor: 0.2,
            min_step: 0.0,
            max_step: None,
            max_steps: DEFAULT_ADAPTIVE_MAX_STEPS,
            max_rejections: 50,
            norm: ErrorNorm::Rms,
        }
    }
}

impl VariableAdamsOptions {
    const FAMILY: &'static str = "variable-adams";

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_max_order(self.max_order)?;
        validate_control(
            self.first_step,
            self.safety,
            self.ifactor,
            self.dfactor,
            self.min_step,
            self.max_step,
            self.max_steps,
        )
    }

    fn controller(&self) -> StepController {
        StepController::new(
            self.safety,
            self.ifactor,
            self.dfactor,
            0.0,
            self.min_step,
            self.max_step.unwrap_or(f64::INFINITY),
        )
    }
}

/// Options for one method family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SolverOptions {
    FixedGrid(FixedGridOptions),
    FixedAdams(FixedAdamsOptions),
    Adaptive(AdaptiveOptions),
    VariableAdams(VariableAdamsOptions),
}

impl SolverOptions {
    pub fn family(&self) -> &'static str {
        match self {
            SolverOptions::FixedGrid(_) => FixedGridOptions::FAMILY,
            SolverOptions::FixedAdams(_) => FixedAdamsOptions::FAMILY,
            SolverOptions::Adaptive(_) => AdaptiveOptions::FAMILY,
            SolverOptions::VariableAdams(_) => VariableAdamsOptions::FAMILY,
        }
    }

    /// Decodes the option family `method` accepts. Field names not in that
    /// family are rejected.
    pub fn deserialize_for<'de, D>(method: Method, deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match method {
            Method::Euler | Method::Midpoint | Method::Rk4 => {
                FixedGridOptions::deserialize(deserializer).map(SolverOptions::FixedGrid)
            }
            Method::ExplicitAdams | Method::AdamsMoulton => {
                FixedAdamsOptions::deserialize(deserializer).map(SolverOptions::FixedAdams)
            }
            Method::Dopri5 | Method::Tsit5 => {
                AdaptiveOptions::deserialize(deserializer).map(SolverOptions::Adaptive)
            }
            Method::VariableAdams => {
                VariableAdamsOptions::deserialize(deserializer).map(SolverOptions::VariableAdams)
            }
        }
    }
}

impl From<FixedGridOptions> for SolverOptions {
    fn from(options: FixedGridOptions) -> Self {
        SolverOptions::FixedGrid(options)
    }
}

impl From<FixedAdamsOptions> for SolverOptions {
    fn from(options: FixedAdamsOptions) -> Self {
        SolverOptions::FixedAdams(options)
    }
}

impl From<AdaptiveOptions> for SolverOptions {
    fn from(options: AdaptiveOptions) -> Self {
        SolverOptions::Adaptive(options)
    }
}

impl From<VariableAdamsOptions> for SolverOptions {
    fn from(options: VariableAdamsOptions) -> Self {
        SolverOptions::VariableAdams(options)
    }
}

/// A ready-to-run solver for one of the [`Method`]s.
pub enum Solver<T: Scalar> {
    FixedGrid(FixedGridSolver<T>),
    FixedAdams(FixedAdamsSolver<T>),
    AdaptiveRk(AdaptiveRkSolver<T>),
    VariableAdams(VariableAdamsSolver<T>),
}

macro_rules! dispatch {
    ($solver:expr, $s:ident => $body:expr) => {
        match $solver {
            Solver::FixedGrid($s) => $body,
            Solver::FixedAdams($s) => $body,
            Solver::AdaptiveRk($s) => $body,
            Solver::VariableAdams($s) => $body,
        }
    };
}

impl<T: Scalar> Stepper<T> for Solver<T> {
    fn record(&self) -> &StepRecord<T> {
        dispatch!(self, s => s.record())
    }

    fn stats(&self) -> SolveStats {
        dispatch!(self, s => s.stats())
    }

    fn max_steps(&self) -> usize {
        dispatch!(self, s => s.max_steps())
    }

    fn step<S: OdeSystem<T> + ?Sized>(
        &mut self,
        system: &S,
        next_time: f64,
        t_bound: f64,
    ) -> Result<(), NumericalError> {
        dispatch!(self, s => s.step(system, next_time, t_bound))
    }
}

fn mismatch(method: Method, options: &SolverOptions) -> ConfigError {
    ConfigError::OptionsMismatch {
        method: method.name(),
        options: options.family(),
    }
}

/// Builds the solver for `method` starting from `(t0, y0)`.
///
/// Options are only accepted together with an explicit method. Tolerances
/// and option ranges are checked here, before any derivative evaluation.
pub fn build_solver<T: Scalar>(
    method: Option<Method>,
    options: Option<SolverOptions>,
    t0: f64,
    y0: &[T],
    rtol: Tolerance,
    atol: Tolerance,
) -> Result<Solver<T>, ConfigError> {
    let method = match (method, &options) {
        (Some(method), _) => method,
        (None, None) => Method::default(),
        (None, Some(_)) => return Err(ConfigError::OptionsWithoutMethod),
    };
    rtol.validate("rtol", y0.len())?;
    atol.validate("atol", y0.len())?;

    let solver = match method {
        Method::Euler | Method::Midpoint | Method::Rk4 => {
            let opts = match options {
                None => FixedGridOptions::default(),
                Some(SolverOptions::FixedGrid(opts)) => opts,
                Some(other) => return Err(mismatch(method, &other)),
            };
            opts.validate()?;
            let scheme = match method {
                Method::Euler => FixedGridScheme::Euler,
                Method::Midpoint => FixedGridScheme::Midpoint,
                _ => FixedGridScheme::Rk4,
            };
            Solver::FixedGrid(FixedGridSolver::new(scheme, t0, y0, opts.step_size, opts.max_steps))
        }
        Method::ExplicitAdams | Method::AdamsMoulton => {
            let opts = match options {
                None => FixedAdamsOptions::default(),
                Some(SolverOptions::FixedAdams(opts)) => opts,
                Some(other) => return Err(mismatch(method, &other)),
            };
            opts.validate()?;
            Solver::FixedAdams(FixedAdamsSolver::new(
                method == Method::AdamsMoulton,
                opts.max_order,
                t0,
                y0,
                opts.step_size,
                opts.max_steps,
            ))
        }
        Method::Dopri5 | Method::Tsit5 => {
            let opts = match options {
                None => AdaptiveOptions::default(),
                Some(SolverOptions::Adaptive(opts)) => opts,
                Some(other) => return Err(mismatch(method, &other)),
            };
            opts.validate()?;
            let tableau = if method == Method::Dopri5 {
                &DORMAND_PRINCE
            } else {
                &TSITOURAS
            };
            Solver::AdaptiveRk(AdaptiveRkSolver::new(
                tableau,
                t0,
                y0,
                ErrorMixer::new(rtol, atol, opts.norm),
                opts.controller(),
                AdaptiveRkConfig {
                    first_step: opts.first_step,
                    max_steps: opts.max_steps,
                    max_rejections: opts.max_rejections,
                },
            ))
        }
        Method::VariableAdams => {
            let opts = match options {
                None => VariableAdamsOptions::default(),
                Some(SolverOptions::VariableAdams(opts)) => opts,
                Some(other) => return Err(mismatch(method, &other)),
            };
            opts.validate()?;
            Solver::VariableAdams(VariableAdamsSolver::new(
                t0,
                y0,
                ErrorMixer::new(rtol, atol, opts.norm),
                opts.controller(),
                VariableAdamsConfig {
                    implicit: opts.implicit,
                    max_order: opts.max_order,
                    first_step: opts.first_step,
                    max_steps: opts.max_steps,
                    max_rejections: opts.max_rejections,
                },
            ))
        }
    };
    Ok(solver)
}
