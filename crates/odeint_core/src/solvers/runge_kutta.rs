//! Adaptive embedded Runge-Kutta pairs (Dormand-Prince 5(4), Tsitouras 5(4)).

use crate::error::NumericalError;
use crate::interpolate::{quartic_fit, DenseOutput, StepRecord};
use crate::solvers::controller::{ensure_step_resolvable, select_initial_step, StepController};
use crate::solvers::tableau::{ButcherTableau, DenseKind, DORMAND_PRINCE_MID};
use crate::tolerance::ErrorMixer;
use crate::traits::{clip_step, combine, OdeSystem, Scalar, SolveStats, Stepper};

/// Step size settings for [`AdaptiveRkSolver`].
#[derive(Debug, Clone)]
pub struct AdaptiveRkConfig {
    pub first_step: Option<f64>,
    pub max_steps: usize,
    pub max_rejections: usize,
}

pub struct AdaptiveRkSolver<T: Scalar> {
    tableau: &'static ButcherTableau,
    mixer: ErrorMixer,
    controller: StepController,
    config: AdaptiveRkConfig,
    /// Proposed size of the next step, unsigned until the direction is known.
    next_h: Option<f64>,
    /// Derivative at the current point, carried over from the last stage.
    f0: Option<Vec<T>>,
    record: StepRecord<T>,
    stats: SolveStats,
}

impl<T: Scalar> AdaptiveRkSolver<T> {
    pub(crate) fn new(
        tableau: &'static ButcherTableau,
        t0: f64,
        y0: &[T],
        mixer: ErrorMixer,
        controller: StepController,
        config: AdaptiveRkConfig,
    ) -> Self {
        Self {
            tableau,
            mixer,
            controller,
            config,
            next_h: None,
            f0: None,
            record: StepRecord::initial(t0, y0.to_vec()),
            stats: SolveStats::default(),
        }
    }

    /// Evaluates the remaining six stages for a step of size `h`.
    /// Returns the propagated solution and all seven stages.
    fn attempt<S: OdeSystem<T> + ?Sized>(
        &mut self,
        system: &S,
        f0: &[T],
        h: f64,
        t1: f64,
    ) -> Result<(Vec<T>, Vec<Vec<T>>), NumericalError> {
        let t0 = self.record.t1;
        let y0 = &self.record.y1;
        let mut k = Vec::with_capacity(7);
        k.push(f0.to_vec());
        for s in 1..6 {
            let ys = combine(y0, h, self.tableau.a[s], &k);
            let ks = self.stats.eval(system, t0 + self.tableau.c[s] * h, &ys)?;
            k.push(ks);
        }
        let y1 = combine(y0, h, &self.tableau.b, &k);
        let last = self.stats.eval(system, t1, &y1)?;
        k.push(last);
        Ok((y1, k))
    }

    fn dense_output(&self, y1: &[T], k: Vec<Vec<T>>, h: f64) -> DenseOutput<T> {
        let y0 = &self.record.y1;
        match self.tableau.dense {
            DenseKind::DormandPrince => {
                let y_mid = combine(y0, h, &DORMAND_PRINCE_MID, &k);
                quartic_fit(y0, y1, &y_mid, &k[0], &k[6], h)
            }
            DenseKind::Tsitouras => DenseOutput::Tsit5 { k },
        }
    }
}

impl<T: Scalar> Stepper<T> for AdaptiveRkSolver<T> {
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

        let f0 = match self.f0.take() {
            Some(f0) => f0,
            None => self.stats.eval(system, t0, &self.record.y1)?,
        };
        let h = match (self.next_h, self.config.first_step) {
            (Some(h), _) | (None, Some(h)) => h,
            (None, None) => select_initial_step(
                system,
                &mut self.stats,
                &self.mixer,
                t0,
                &self.record.y1,
                &f0,
                self.tableau.error_order - 1,
                direction,
                self.controller.max_step,
            )?,
        };
        let mut h = direction * self.controller.limit(h.abs());

        let p = self.tableau.error_order;
        let mut rejections = 0;
        loop {
            let (h_step, t1) = clip_step(t0, h, t_bound);
            ensure_step_resolvable(t0, h_step)?;

            let (y1, k) = self.attempt(system, &f0, h_step, t1)?;
            let zeros = vec![T::zero(); y1.len()];
            let error = combine(&zeros, h_step, &self.tableau.e, &k);
            let err = self.mixer.error_ratio(&error, &self.record.y1, &y1);

            if err <= 1.0 {
                self.next_h = Some(self.controller.accept(h_step, err, p).abs());
                self.stats.naccept += 1;
                self.f0 = Some(k[6].clone());
                let dense = self.dense_output(&y1, k, h_step);
                self.record = StepRecord {
                    t0,
                    t1,
                    y0: std::mem::take(&mut self.record.y1),
                    y1,
                    order: p,
                    dense,
                };
                return Ok(());
            }

            self.stats.nreject += 1;
            rejections += 1;
            if rejections > self.config.max_rejections {
                return Err(NumericalError::TooManyRejections { t: t0, rejections });
            }
            h = self.controller.reject(h_step, err, p);
            log::debug!("rejected step h = {h_step:e} at t = {t0} (error ratio {err:.3e}), retrying with {h:e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::tableau::{DORMAND_PRINCE, TSITOURAS};
    use crate::tolerance::ErrorNorm;
    use crate::traits::FnSystem;

    fn solver(
        tableau: &'static ButcherTableau,
        rtol: f64,
        atol: f64,
        first_step: Option<f64>,
        max_rejections: usize,
    ) -> AdaptiveRkSolver<f64> {
        AdaptiveRkSolver::new(
            tableau,
            0.0,
            &[1.0],
            ErrorMixer::new(rtol.into(), atol.into(), ErrorNorm::Rms),
            StepController::new(0.9, 10.0, 0.2, 0.04, 0.0, f64::INFINITY),
            AdaptiveRkConfig {
                first_step,
                max_steps: 100_000,
                max_rejections,
            },
        )
    }

    fn decay() -> FnSystem<impl Fn(f64, &[f64], &mut [f64])> {
        FnSystem::new(1, |_t: f64, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0])
    }

    fn run_to(solver: &mut AdaptiveRkSolver<f64>, t_end: f64) {
        let system = decay();
        while solver.time() != t_end {
            solver.step(&system, t_end, t_end).expect("adaptive step");
        }
    }

    #[test]
    fn both_pairs_track_exponential_decay() {
        for tableau in [&DORMAND_PRINCE, &TSITOURAS] {
            let mut s = solver(tableau, 1e-7, 1e-9, None, 50);
            run_to(&mut s, 2.0);
            let err = (s.state()[0] - (-2.0_f64).exp()).abs();
            assert!(err < 1e-6, "error {err}");
            assert_eq!(s.time(), 2.0);
        }
    }

    #[test]
    fn last_stage_is_reused() {
        let mut s = solver(&DORMAND_PRINCE, 1e-6, 1e-9, Some(0.01), 50);
        run_to(&mut s, 1.0);
        let stats = s.stats();
        // one initial evaluation, six new stages per attempt
        assert_eq!(stats.nfev, 1 + 6 * (stats.naccept + stats.nreject));
    }

    #[test]
    fn dense_output_is_accurate_inside_steps() {
        for tableau in [&DORMAND_PRINCE, &TSITOURAS] {
            let mut s = solver(tableau, 1e-8, 1e-10, None, 50);
            let system = decay();
            for _ in 0..5 {
                s.step(&system, 3.0, 3.0).expect("adaptive step");
                let rec = s.record();
                for frac in [0.25, 0.5, 0.8] {
                    let t = rec.t0 + frac * rec.h();
                    let err = (rec.interpolate(t)[0] - (-t).exp()).abs();
                    assert!(err < 1e-6, "t = {t}: error {err}");
                }
            }
        }
    }

    #[test]
    fn integrates_backwards() {
        let mut s = solver(&TSITOURAS, 1e-8, 1e-10, None, 50);
        run_to(&mut s, -1.0);
        assert!((s.state()[0] - 1.0_f64.exp()).abs() < 1e-6);
        assert!(s.record().h() < 0.0);
    }

    #[test]
    fn rejection_budget_is_enforced() {
        let mut s = solver(&DORMAND_PRINCE, 1e-10, 1e-12, Some(10.0), 0);
        let err = s.step(&decay(), 10.0, 10.0).expect_err("huge first step");
        assert_eq!(
            err,
            NumericalError::TooManyRejections {
                t: 0.0,
                rejections: 1
            }
        );
        assert_eq!(s.time(), 0.0);
    }

    #[test]
    fn step_never_passes_bound() {
        let mut s = solver(&DORMAND_PRINCE, 1e-3, 1e-6, Some(5.0), 50);
        s.step(&decay(), 0.2, 0.2).expect("step");
        assert_eq!(s.time(), 0.2);
    }

    #[test]
    fn first_step_respects_max_step() {
        for tableau in [&DORMAND_PRINCE, &TSITOURAS] {
            let mut s = AdaptiveRkSolver::new(
                tableau,
                0.0,
                &[1.0],
                ErrorMixer::new(1e-3.into(), 1e-6.into(), ErrorNorm::Rms),
                StepController::new(0.9, 10.0, 0.2, 0.04, 0.0, 0.01),
                AdaptiveRkConfig {
                    first_step: Some(1.0),
                    max_steps: 100_000,
                    max_rejections: 50,
                },
            );
            s.step(&decay(), 0.5, 0.5).expect("first step");
            assert_eq!(s.record().h(), 0.01);
        }
    }
}
