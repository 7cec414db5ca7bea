//! Constant-order Adams-Bashforth and Adams-Bashforth-Moulton on a fixed grid.

use std::collections::VecDeque;

use crate::error::NumericalError;
use crate::interpolate::{DenseOutput, StepRecord};
use crate::solvers::adams::{AdamsTrial, History};
use crate::solvers::controller::ensure_step_resolvable;
use crate::solvers::fixed_grid::rk4_step;
use crate::traits::{clip_step, OdeSystem, Scalar, SolveStats, Stepper};

/// Multistep solver of fixed order. The first `order - 1` steps are classical
/// RK4 steps that fill the derivative history.
pub struct FixedAdamsSolver<T: Scalar> {
    corrector: bool,
    order: usize,
    step_size: Option<f64>,
    max_steps: usize,
    history: History<T>,
    record: StepRecord<T>,
    stats: SolveStats,
}

impl<T: Scalar> FixedAdamsSolver<T> {
    pub fn new(
        corrector: bool,
        order: usize,
        t0: f64,
        y0: &[T],
        step_size: Option<f64>,
        max_steps: usize,
    ) -> Self {
        Self {
            corrector,
            order,
            step_size,
            max_steps,
            history: VecDeque::with_capacity(order),
            record: StepRecord::initial(t0, y0.to_vec()),
            stats: SolveStats::default(),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }
}

impl<T: Scalar> Stepper<T> for FixedAdamsSolver<T> {
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

        if self.history.is_empty() {
            let f0 = self.stats.eval(system, t0, &self.record.y1)?;
            self.history.push_front((t0, f0));
        }

        let (y1, f1, order, dense) = if self.history.len() < self.order {
            let k1 = self.history[0].1.clone();
            let (y1, k) = rk4_step(system, &mut self.stats, t0, &self.record.y1, k1, h)?;
            let f1 = self.stats.eval(system, t1, &y1)?;
            (y1, f1, 4, DenseOutput::ClassicalRk4 { k })
        } else {
            let k = self.order;
            let trial = AdamsTrial::predict(
                system,
                &mut self.stats,
                &self.history,
                k,
                k,
                t0,
                &self.record.y1,
                t1,
            )?;
            if self.corrector {
                let y1 = trial.corrected(k);
                let f1 = self.stats.eval(system, t1, &y1)?;
                (y1, f1, k + 1, trial.dense(k, true))
            } else {
                let dense = trial.dense(k, false);
                (trial.y_pred, trial.f_pred, k, dense)
            }
        };

        self.history.push_front((t1, f1));
        self.history.truncate(self.order);
        self.stats.naccept += 1;
        self.record = StepRecord {
            t0,
            t1,
            y0: std::mem::take(&mut self.record.y1),
            y1,
            order,
            dense,
        };
        Ok(())
    }
}
