//! The `integrate` entry point and its trajectory.

use serde::Serialize;

use crate::error::{ConfigError, NumericalError, SolveError};
use crate::method::{build_solver, Method, SolverOptions};
use crate::tolerance::Tolerance;
use crate::traits::{OdeSystem, Scalar, SolveStats, Stepper};

pub const DEFAULT_RTOL: f64 = 1e-7;
pub const DEFAULT_ATOL: f64 = 1e-9;

/// States at the requested times, first entry the initial state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory<T> {
    pub times: Vec<f64>,
    pub states: Vec<Vec<T>>,
    pub stats: SolveStats,
    pub method: Method,
}

impl<T> Trajectory<T> {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_at(&self, index: usize) -> Option<&[T]> {
        self.states.get(index).map(Vec::as_slice)
    }

    pub fn last(&self) -> Option<&[T]> {
        self.states.last().map(Vec::as_slice)
    }

    /// `(time, state)` pairs in query order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &[T])> + '_ {
        self.times.iter().copied().zip(self.states.iter().map(Vec::as_slice))
    }
}

/// Returns +1 or -1 for the direction of integration.
fn validate_times(times: &[f64]) -> Result<f64, ConfigError> {
    if times.is_empty() {
        return Err(ConfigError::EmptyTimes);
    }
    if let Some(index) = times.iter().position(|t| !t.is_finite()) {
        return Err(ConfigError::NonFiniteTime { index });
    }
    let direction = match times.get(1) {
        Some(&t1) if t1 < times[0] => -1.0,
        _ => 1.0,
    };
    for (i, pair) in times.windows(2).enumerate() {
        if (pair[1] - pair[0]) * direction <= 0.0 {
            return Err(ConfigError::NonMonotonicTimes {
                index: i + 1,
                value: pair[1],
            });
        }
    }
    Ok(direction)
}

/// Solves `y' = f(t, y)`, `y(times[0]) = y0` and reports the state at every
/// entry of `times`.
///
/// `times` must be strictly increasing or strictly decreasing. `method`
/// defaults to dopri5; `options` are only accepted with an explicit method.
/// Configuration problems are reported before the derivative is evaluated.
pub fn integrate<T, S>(
    system: &S,
    y0: &[T],
    times: &[f64],
    rtol: impl Into<Tolerance>,
    atol: impl Into<Tolerance>,
    method: Option<Method>,
    options: Option<SolverOptions>,
) -> Result<Trajectory<T>, SolveError>
where
    T: Scalar,
    S: OdeSystem<T> + ?Sized,
{
    let direction = validate_times(times)?;
    if system.dimension() != y0.len() {
        return Err(ConfigError::DimensionMismatch {
            expected: system.dimension(),
            got: y0.len(),
        }
        .into());
    }
    let chosen = method.unwrap_or_default();
    let mut solver = build_solver(method, options, times[0], y0, rtol.into(), atol.into())?;

    let mut states = Vec::with_capacity(times.len());
    states.push(y0.to_vec());
    let t_end = times[times.len() - 1];

    for &t in &times[1..] {
        while (t - solver.time()) * direction > 0.0 {
            if solver.stats().naccept >= solver.max_steps() {
                return Err(NumericalError::MaxStepsExceeded {
                    t: solver.time(),
                    max_steps: solver.max_steps(),
                }
                .into());
            }
            solver.step(system, t, t_end)?;
        }
        states.push(solver.record().interpolate(t));
    }

    let stats = solver.stats();
    log::debug!(
        "{chosen}: reached t = {} with {} steps, {} rejections, {} evaluations",
        solver.time(),
        stats.naccept,
        stats.nreject,
        stats.nfev
    );
    Ok(Trajectory {
        times: times.to_vec(),
        states,
        stats,
        method: chosen,
    })
}
