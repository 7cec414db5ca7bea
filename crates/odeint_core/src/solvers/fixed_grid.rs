//! Fixed-step explicit methods: forward Euler, midpoint and classical RK4.

use crate::error::NumericalError;
use crate::interpolate::{DenseOutput, StepRecord};
use crate::solvers::controller::ensure_step_resolvable;
use crate::traits::{clip_step, combine, OdeSystem, Scalar, SolveStats, Stepper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedGridScheme {
    Euler,
    Midpoint,
    Rk4,
}

impl FixedGridScheme {
    /// Derivative evaluations per step.
    pub fn stages(self) -> usize {
        match self {
            FixedGridScheme::Euler => 1,
            FixedGridScheme::Midpoint => 2,
            FixedGridScheme::Rk4 => 4,
        }
    }

    pub fn order(self) -> usize {
        self.stages()
    }
}

/// Advances with a constant step. Without a configured step size it steps
/// from one requested time straight to the next.
pub struct FixedGridSolver<T: Scalar> {
    scheme: FixedGridScheme,
    step_size: Option<f64>,
    max_steps: usize,
    record: StepRecord<T>,
    stats: SolveStats,
}

impl<T: Scalar> FixedGridSolver<T> {
    pub fn new(
        scheme: FixedGridScheme,
        t0: f64,
        y0: &[T],
        step_size: Option<f64>,
        max_steps: usize,
    ) -> Self {
        Self {
            scheme,
            step_size,
            max_steps,
            record: StepRecord::initial(t0, y0.to_vec()),
            stats: SolveStats::default(),
        }
    }

    pub fn scheme(&self) -> FixedGridScheme {
        self.scheme
    }
}

impl<T: Scalar> Stepper<T> for FixedGridSolver<T> {
    fn record(&self) -> &StepRecord<T> {
        &self.record
    }

    fn stats(&self) -> SolveStats {
        self.stats
    }

    fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn step<S: OdeSystem<T> + ?Sized>(
        &mut self,
        system: &S,
        next_time: f64,
        t_bound: f64,
    ) -> Result<(), NumericalError> {
        let t0 = self.record.t1;
        let (h, t1) = match self.step_size {
            Some(size) => clip_step(t0, size.copysign(t_bound - t0), t_bound),
            None => (next_time - t0, next_time),
        };
        ensure_step_resolvable(t0, h)?;

        let y0 = &self.record.y1;
        let (y1, dense) = match self.scheme {
            FixedGridScheme::Euler => {
                let k1 = self.stats.eval(system, t0, y0)?;
                (combine(y0, h, &[1.0], &[k1]), DenseOutput::Linear)
            }
            FixedGridScheme::Midpoint => {
                let k1 = self.stats.eval(system, t0, y0)?;
                let half = combine(y0, 0.5 * h, &[1.0], std::slice::from_ref(&k1));
                let k2 = self.stats.eval(system, t0 + 0.5 * h, &half)?;
                (combine(y0, h, &[1.0], &[k2]), DenseOutput::Quadratic { f0: k1 })
            }
            FixedGridScheme::Rk4 => {
                // k1 = f(t, y)
                let k1 = self.stats.eval(system, t0, y0)?;
                // k2 = f(t + h/2, y + h*k1/2)
                let tmp = combine(y0, 0.5 * h, &[1.0], std::slice::from_ref(&k1));
                let k2 = self.stats.eval(system, t0 + 0.5 * h, &tmp)?;
                // k3 = f(t + h/2, y + h*k2/2)
                let tmp = combine(y0, 0.5 * h, &[1.0], std::slice::from_ref(&k2));
                let k3 = self.stats.eval(system, t0 + 0.5 * h, &tmp)?;
                // k4 = f(t + h, y + h*k3)
                let tmp = combine(y0, h, &[1.0], std::slice::from_ref(&k3));
                let k4 = self.stats.eval(system, t1, &tmp)?;
                let k = vec![k1, k2, k3, k4];
                // y_next = y + h/6 * (k1 + 2k2 + 2k3 + k4)
                let sixth = 1.0 / 6.0;
                let y1 = combine(y0, h, &[sixth, 2.0 * sixth, 2.0 * sixth, sixth], &k);
                (y1, DenseOutput::ClassicalRk4 { k })
            }
        };

        self.stats.naccept += 1;
        self.record = StepRecord {
            t0,
            t1,
            y0: self.record.y1.clone(),
            y1,
            order: self.scheme.order(),
            dense,
        };
        Ok(())
    }
}

/// One classical RK4 step reusing a known `k1`; used to start multistep methods.
/// Returns the new state and the four stages. Spends three evaluations.
pub(crate) fn rk4_step<T, S>(
    system: &S,
    stats: &mut SolveStats,
    t0: f64,
    y0: &[T],
    k1: Vec<T>,
    h: f64,
) -> Result<(Vec<T>, Vec<Vec<T>>), NumericalError>
where
    T: Scalar,
    S: OdeSystem<T> + ?Sized,
{
    let tmp = combine(y0, 0.5 * h, &[1.0], std::slice::from_ref(&k1));
    let k2 = stats.eval(system, t0 + 0.5 * h, &tmp)?;
    let tmp = combine(y0, 0.5 * h, &[1.0], std::slice::from_ref(&k2));
    let k3 = stats.eval(system, t0 + 0.5 * h, &tmp)?;
    let tmp = combine(y0, h, &[1.0], std::slice::from_ref(&k3));
    let k4 = stats.eval(system, t0 + h, &tmp)?;
    let k = vec![k1, k2, k3, k4];
    let sixth = 1.0 / 6.0;
    let y1 = combine(y0, h, &[sixth, 2.0 * sixth, 2.0 * sixth, sixth], &k);
    Ok((y1, k))
}
