//! Step size control shared by the adaptive solvers.

use crate::error::NumericalError;
use crate::tolerance::ErrorMixer;
use crate::traits::{OdeSystem, Scalar, SolveStats};

/// Proportional-integral step size controller (Hairer's DOPRI5 variant).
///
/// On acceptance: `fac = err^(1/p - 0.75*beta) / prev_err^beta`, then
/// `h_new = h / clamp(fac / safety, 1/ifactor, 1/dfactor)`.
/// On rejection the integral term is dropped, and the step accepted right
/// after a rejection may not grow.
#[derive(Debug, Clone)]
pub(crate) struct StepController {
    pub safety: f64,
    pub ifactor: f64,
    pub dfactor: f64,
    pub beta: f64,
    pub min_step: f64,
    pub max_step: f64,
    prev_error: f64,
    last_rejected: bool,
}

impl StepController {
    pub fn new(safety: f64, ifactor: f64, dfactor: f64, beta: f64, min_step: f64, max_step: f64) -> Self {
        Self {
            safety,
            ifactor,
            dfactor,
            beta,
            min_step,
            max_step,
            prev_error: 1e-4,
            last_rejected: false,
        }
    }

    /// Next step after accepting a step of size `h` with error ratio `err`.
    /// `p` is the exponent order: the local error scales like `h^p`.
    pub fn accept(&mut self, h: f64, err: f64, p: usize) -> f64 {
        let scale = if err == 0.0 {
            self.ifactor
        } else {
            let alpha = 1.0 / p as f64 - 0.75 * self.beta;
            let fac = err.powf(alpha) / self.prev_error.powf(self.beta);
            1.0 / (fac / self.safety).clamp(1.0 / self.ifactor, 1.0 / self.dfactor)
        };
        self.prev_error = err.max(1e-4);
        let scale = if std::mem::take(&mut self.last_rejected) {
            scale.min(1.0)
        } else {
            scale
        };
        self.limit(h * scale)
    }

    /// Shrunken step after rejecting a step of size `h` with error ratio `err > 1`.
    pub fn reject(&mut self, h: f64, err: f64, p: usize) -> f64 {
        self.last_rejected = true;
        let shrink = if err.is_finite() {
            (self.safety * err.powf(-1.0 / p as f64)).clamp(self.dfactor, 1.0)
        } else {
            self.dfactor
        };
        self.limit(h * shrink)
    }

    /// Clamps the magnitude to `[min_step, max_step]`, keeping the sign.
    pub fn limit(&self, h: f64) -> f64 {
        h.signum() * h.abs().clamp(self.min_step, self.max_step)
    }
}

/// Fails when `t0 + h` cannot be told apart from `t0`.
pub(crate) fn ensure_step_resolvable(t0: f64, h: f64) -> Result<(), NumericalError> {
    if h == 0.0 || t0 + h == t0 || !h.is_finite() {
        return Err(NumericalError::StepSizeTooSmall { t: t0, h });
    }
    Ok(())
}

/// Initial step heuristic (Hairer, Norsett & Wanner II.4) for a method whose
/// local error scales like `h^(order + 1)`. Spends one evaluation.
#[allow(clippy::too_many_arguments)]
pub(crate) fn select_initial_step<T, S>(
    system: &S,
    stats: &mut SolveStats,
    mixer: &ErrorMixer,
    t0: f64,
    y0: &[T],
    f0: &[T],
    order: usize,
    direction: f64,
    max_step: f64,
) -> Result<f64, NumericalError>
where
    T: Scalar,
    S: OdeSystem<T> + ?Sized,
{
    let d0 = mixer.scaled_norm(y0, y0);
    let d1 = mixer.scaled_norm(f0, y0);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(max_step);

    let y_trial: Vec<T> = y0
        .iter()
        .zip(f0)
        .map(|(&y, &f)| y + T::from_real(direction * h0) * f)
        .collect();
    let f1 = stats.eval(system, t0 + direction * h0, &y_trial)?;
    let df: Vec<T> = f1.iter().zip(f0).map(|(&a, &b)| a - b).collect();
    let d2 = mixer.scaled_norm(&df, y0) / h0;

    let dmax = d1.max(d2);
    let h1 = if dmax <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / dmax).powf(1.0 / (order as f64 + 1.0))
    };
    Ok(direction * (100.0 * h0).min(h1).min(max_step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tolerance::ErrorNorm;
    use crate::traits::FnSystem;

    fn controller() -> StepController {
        StepController::new(0.9, 10.0, 0.2, 0.0, 0.0, f64::INFINITY)
    }

    #[test]
    fn accept_grows_small_errors_up_to_ifactor() {
        let mut c = controller();
        assert_eq!(c.accept(0.1, 0.0, 5), 0.1 * 10.0);
        let h = c.accept(0.1, 1e-12, 5);
        assert!((h - 1.0).abs() < 1e-12);
    }

    #[test]
    fn accept_near_unit_error_shrinks_by_safety() {
        let mut c = controller();
        let h = c.accept(1.0, 1.0, 5);
        assert!((h - 0.9).abs() < 1e-12);
    }

    #[test]
    fn reject_is_bounded_by_dfactor() {
        let mut c = controller();
        assert!((c.reject(1.0, 1e12, 5) - 0.2).abs() < 1e-12);
        assert!((c.reject(-1.0, f64::NAN, 5) + 0.2).abs() < 1e-12);
        let mild = c.reject(1.0, 2.0, 5);
        assert!(mild < 1.0 && mild > 0.2);
    }

    #[test]
    fn no_growth_on_the_step_after_a_rejection() {
        let mut c = controller();
        let h = c.reject(1.0, 4.0, 5);
        assert_eq!(c.accept(h, 1e-6, 5), h);
        // only the first acceptance is capped
        assert!(c.accept(h, 1e-6, 5) > h);
    }

    #[test]
    fn integral_term_damps_growth_after_large_errors() {
        let mut plain = controller();
        let mut pi = StepController::new(0.9, 10.0, 0.2, 0.04, 0.0, f64::INFINITY);
        plain.accept(1.0, 0.9, 5);
        pi.accept(1.0, 0.9, 5);
        assert!(pi.accept(1.0, 0.5, 5) < plain.accept(1.0, 0.5, 5));
    }

    #[test]
    fn limit_keeps_sign_and_bounds() {
        let c = StepController::new(0.9, 10.0, 0.2, 0.0, 0.01, 0.5);
        assert_eq!(c.limit(-2.0), -0.5);
        assert_eq!(c.limit(0.001), 0.01);
    }

    #[test]
    fn underflow_is_detected() {
        assert!(ensure_step_resolvable(1.0, 1e-20).is_err());
        assert!(ensure_step_resolvable(1.0, 1e-3).is_ok());
    }

    #[test]
    fn initial_step_is_reasonable_for_decay() {
        let system = FnSystem::new(1, |_t: f64, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0]);
        let mixer = ErrorMixer::new(1e-7.into(), 1e-9.into(), ErrorNorm::Rms);
        let mut stats = SolveStats::default();
        let h = select_initial_step(&system, &mut stats, &mixer, 0.0, &[1.0], &[-1.0], 4, -1.0, 10.0)
            .expect("initial step");
        assert!(h < 0.0 && h.abs() > 1e-4 && h.abs() < 1.0);
        assert_eq!(stats.nfev, 1);
    }
}
