//! Variable-step, variable-order Adams predictor-corrector.
//!
//! The derivative history is kept newest first together with its time nodes.
//! A step of order `k` predicts with the `k` newest nodes (Adams-Bashforth),
//! evaluates at the predicted point and, when implicit, corrects with the
//! Newton term through the new node (Adams-Moulton, PECE). The same extension
//! of the divided-difference table gives error estimates at the neighbouring
//! orders, which drive order selection.

use std::collections::VecDeque;

use crate::error::NumericalError;
use crate::interpolate::{DenseOutput, StepRecord};
use crate::solvers::controller::{ensure_step_resolvable, select_initial_step, StepController};
use crate::solvers::newton::{basis_integrals, DividedDifferences};
use crate::tolerance::ErrorMixer;
use crate::traits::{clip_step, combine, OdeSystem, Scalar, SolveStats, Stepper};

/// Derivative samples, newest first.
pub(crate) type History<T> = VecDeque<(f64, Vec<T>)>;

/// Everything one predictor evaluation yields.
pub(crate) struct AdamsTrial<T> {
    pub y_pred: Vec<T>,
    pub f_pred: Vec<T>,
    nodes: Vec<f64>,
    coeffs: Vec<Vec<T>>,
    /// `f[x_0..x_{j-1}, t1]` for `j = 0..=m`.
    extended: Vec<Vec<T>>,
    /// Basis integrals over the step for `j = 0..=m`.
    weights: Vec<f64>,
}

impl<T: Scalar> AdamsTrial<T> {
    /// Predicts with order `k` from the `m >= k` newest samples and evaluates
    /// the derivative at the prediction.
    #[allow(clippy::too_many_arguments)]
    pub fn predict<S: OdeSystem<T> + ?Sized>(
        system: &S,
        stats: &mut SolveStats,
        history: &History<T>,
        k: usize,
        m: usize,
        t0: f64,
        y0: &[T],
        t1: f64,
    ) -> Result<Self, NumericalError> {
        debug_assert!(k >= 1 && k <= m && m <= history.len());
        let dd = DividedDifferences::new(history.iter().take(m).map(|(t, f)| (*t, f.as_slice())));
        let weights = basis_integrals(&dd.nodes, t0, t1, m + 1);
        let y_pred = combine(y0, 1.0, &weights[..k], &dd.coeffs[..k]);
        let f_pred = stats.eval(system, t1, &y_pred)?;
        let extended = dd.extend(t1, &f_pred);
        Ok(Self {
            y_pred,
            f_pred,
            nodes: dd.nodes,
            coeffs: dd.coeffs,
            extended,
            weights,
        })
    }

    /// Highest `j` for which [`Self::correction`] is available.
    pub fn max_estimate(&self) -> usize {
        self.weights.len() - 1
    }

    /// `W_j * f[x_0..x_{j-1}, t1]`: the local error of the order `j` predictor,
    /// and the correction term of the order `j` corrector.
    pub fn correction(&self, j: usize) -> Vec<T> {
        let w = T::from_real(self.weights[j]);
        self.extended[j].iter().map(|&e| w * e).collect()
    }

    pub fn corrected(&self, k: usize) -> Vec<T> {
        combine(&self.y_pred, self.weights[k], &[1.0], &self.extended[k..=k])
    }

    /// Polynomial reproducing the accepted value at the end of the step.
    pub fn dense(&self, k: usize, implicit: bool) -> DenseOutput<T> {
        let mut coeffs = self.coeffs[..k].to_vec();
        if implicit {
            coeffs.push(self.extended[k].clone());
        }
        DenseOutput::Adams {
            nodes: self.nodes[..k].to_vec(),
            coeffs,
        }
    }
}

/// Settings for [`VariableAdamsSolver`].
#[derive(Debug, Clone)]
pub struct VariableAdamsConfig {
    pub implicit: bool,
    pub max_order: usize,
    pub first_step: Option<f64>,
    pub max_steps: usize,
    pub max_rejections: usize,
}

pub struct VariableAdamsSolver<T: Scalar> {
    mixer: ErrorMixer,
    controller: StepController,
    config: VariableAdamsConfig,
    order: usize,
    steps_at_order: usize,
    /// Order grows by one per step until the estimates stop improving.
    starting: bool,
    next_h: Option<f64>,
    history: History<T>,
    record: StepRecord<T>,
    stats: SolveStats,
}

impl<T: Scalar> VariableAdamsSolver<T> {
    pub(crate) fn new(
        t0: f64,
        y0: &[T],
        mixer: ErrorMixer,
        controller: StepController,
        config: VariableAdamsConfig,
    ) -> Self {
        Self {
            mixer,
            controller,
            history: VecDeque::with_capacity(config.max_order + 1),
            config,
            order: 1,
            steps_at_order: 0,
            starting: true,
            next_h: None,
            record: StepRecord::initial(t0, y0.to_vec()),
            stats: SolveStats::default(),
        }
    }

    /// Order used by the most recent step, or the order of the next one
    /// before any step is taken.
    pub fn order(&self) -> usize {
        self.order
    }

    fn estimate(&self, trial: &AdamsTrial<T>, j: usize, y1: &[T]) -> f64 {
        self.mixer.error_ratio(&trial.correction(j), &self.record.y1, y1)
    }

    /// Chooses the order of the next step from the estimates of this one.
    /// Returns the new order and the error ratio it would have produced.
    fn select_order(&self, trial: &AdamsTrial<T>, y1: &[T], err_k: f64) -> (usize, f64) {
        let k = self.order;
        let lower = |j: usize| self.estimate(trial, j, y1);
        let can_raise = k < self.config.max_order;

        if self.starting {
            if can_raise && (k == 1 || err_k < lower(k - 1)) {
                if trial.max_estimate() > k {
                    return (k + 1, self.estimate(trial, k + 1, y1));
                }
                return (k + 1, err_k);
            }
            return (k, err_k);
        }

        if k > 1 {
            let err_km1 = lower(k - 1);
            let worst_lower = if k > 2 { err_km1.max(lower(k - 2)) } else { err_km1 };
            if worst_lower <= err_k {
                return (k - 1, err_km1);
            }
        }
        if can_raise && self.steps_at_order > k && trial.max_estimate() > k {
            let err_kp1 = self.estimate(trial, k + 1, y1);
            if err_kp1 < err_k {
                return (k + 1, err_kp1);
            }
        }
        (k, err_k)
    }
}

impl<T: Scalar> Stepper<T> for VariableAdamsSolver<T> {
    fn record(&self) -> &StepRecord<T> {
        &self.record
    }

    fn stats(&self) -> SolveStats {
        self.stats
    }

    fn max_steps(&self) -> usize {
        self.config.max_steps
    }

    fn step<S: OdeSystem<T> + ?Sized>(
        &mut self,
        system: &S,
        _next_time: f64,
        t_bound: f64,
    ) -> Result<(), NumericalError> {
        let t0 = self.record.t1;
        let direction = if t_bound >= t0 { 1.0 } else { -1.0 };

        if self.history.is_empty() {
            let f0 = self.stats.eval(system, t0, &self.record.y1)?;
            self.history.push_front((t0, f0));
        }
        if self.order > self.history.len() {
            log::warn!(
                "order {} needs more history than the {} samples held at t = {t0}; restarting from order 1",
                self.order,
                self.history.len()
            );
            self.order = 1;
            self.steps_at_order = 0;
            self.starting = true;
        }

        let h = match (self.next_h, self.config.first_step) {
            (Some(h), _) | (None, Some(h)) => h,
            (None, None) => select_initial_step(
                system,
                &mut self.stats,
                &self.mixer,
                t0,
                &self.record.y1,
                &self.history[0].1,
                1,
                direction,
                self.controller.max_step,
            )?,
        };
        let mut h = direction * self.controller.limit(h.abs());

        let mut rejections = 0;
        loop {
            let (h_step, t1) = clip_step(t0, h, t_bound);
            ensure_step_resolvable(t0, h_step)?;

            let k = self.order;
            let m = self.history.len().min(k + 1);
            let trial = AdamsTrial::predict(
                system,
                &mut self.stats,
                &self.history,
                k,
                m,
                t0,
                &self.record.y1,
                t1,
            )?;
            let y1 = if self.config.implicit {
                trial.corrected(k)
            } else {
                trial.y_pred.clone()
            };
            let err = self.estimate(&trial, k, &y1);

            if err <= 1.0 {
                let (next_order, next_err) = self.select_order(&trial, &y1, err);
                self.next_h = Some(self.controller.accept(h_step, next_err, next_order + 1).abs());

                let f1 = if self.config.implicit {
                    self.stats.eval(system, t1, &y1)?
                } else {
                    trial.f_pred.clone()
                };
                self.history.push_front((t1, f1));
                self.history.truncate(self.config.max_order + 1);

                if next_order != k {
                    log::debug!("adams order {k} -> {next_order} at t = {t1}");
                    self.steps_at_order = 0;
                } else {
                    self.starting = false;
                    self.steps_at_order += 1;
                }
                self.order = next_order;

                self.stats.naccept += 1;
                self.record = StepRecord {
                    t0,
                    t1,
                    y0: std::mem::take(&mut self.record.y1),
                    y1,
                    order: k,
                    dense: trial.dense(k, self.config.implicit),
                };
                return Ok(());
            }

            self.stats.nreject += 1;
            rejections += 1;
            if rejections > self.config.max_rejections {
                return Err(NumericalError::TooManyRejections { t: t0, rejections });
            }
            self.starting = false;
            if k > 1 && self.estimate(&trial, k - 1, &y1) <= err {
                self.order = k - 1;
                self.steps_at_order = 0;
            }
            h = self.controller.reject(h_step, err, self.order + 1);
            log::debug!(
                "rejected adams step h = {h_step:e} at t = {t0} (order {k}, error ratio {err:.3e}), retrying with {h:e}"
            );
        }
    }
}
