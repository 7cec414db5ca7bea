use crate::error::NumericalError;
use crate::interpolate::StepRecord;
use num_complex::Complex;
use num_traits::Num;
use std::fmt::Debug;
use std::ops::Neg;

/// A trait for types that can be used as state elements.
/// Covers real and complex floating point values; time stays `f64` regardless.
pub trait Scalar: Num + Neg<Output = Self> + Copy + Debug + Send + Sync + 'static {
    /// Embeds a real coefficient (step sizes, tableau weights) into the scalar type.
    fn from_real(value: f64) -> Self;

    /// Magnitude used by tolerance envelopes and error norms.
    fn modulus(self) -> f64;

    /// True when every component is finite.
    fn finite(self) -> bool;
}

impl Scalar for f64 {
    fn from_real(value: f64) -> Self {
        value
    }

    fn modulus(self) -> f64 {
        self.abs()
    }

    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl Scalar for f32 {
    fn from_real(value: f64) -> Self {
        value as f32
    }

    fn modulus(self) -> f64 {
        f64::from(self.abs())
    }

    fn finite(self) -> bool {
        self.is_finite()
    }
}

impl Scalar for Complex<f64> {
    fn from_real(value: f64) -> Self {
        Complex::new(value, 0.0)
    }

    fn modulus(self) -> f64 {
        self.norm()
    }

    fn finite(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

impl Scalar for Complex<f32> {
    fn from_real(value: f64) -> Self {
        Complex::new(value as f32, 0.0)
    }

    fn modulus(self) -> f64 {
        f64::from(self.norm())
    }

    fn finite(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

/// Represents a first-order system y' = f(t, y).
pub trait OdeSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// y: current state
    /// dydt: buffer to write the derivative into
    fn apply(&self, t: f64, y: &[T], dydt: &mut [T]);
}

impl<T: Scalar, S: OdeSystem<T> + ?Sized> OdeSystem<T> for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn apply(&self, t: f64, y: &[T], dydt: &mut [T]) {
        (**self).apply(t, y, dydt)
    }
}

/// Adapts a closure `|t, y, dydt|` into an [`OdeSystem`].
pub struct FnSystem<F> {
    dim: usize,
    f: F,
}

impl<F> FnSystem<F> {
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<T, F> OdeSystem<T> for FnSystem<F>
where
    T: Scalar,
    F: Fn(f64, &[T], &mut [T]),
{
    fn dimension(&self) -> usize {
        self.dim
    }

    fn apply(&self, t: f64, y: &[T], dydt: &mut [T]) {
        (self.f)(t, y, dydt)
    }
}

/// Work counters accumulated by a solver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SolveStats {
    /// Derivative evaluations.
    pub nfev: usize,
    /// Accepted steps.
    pub naccept: usize,
    /// Rejected step attempts.
    pub nreject: usize,
}

impl SolveStats {
    /// Evaluates the system into a fresh buffer, counting the call and
    /// refusing non-finite output.
    pub(crate) fn eval<T, S>(&mut self, system: &S, t: f64, y: &[T]) -> Result<Vec<T>, NumericalError>
    where
        T: Scalar,
        S: OdeSystem<T> + ?Sized,
    {
        let mut dydt = vec![T::zero(); y.len()];
        system.apply(t, y, &mut dydt);
        self.nfev += 1;
        if dydt.iter().any(|v| !v.finite()) {
            return Err(NumericalError::NonFiniteDerivative { t });
        }
        Ok(dydt)
    }
}

/// A trait for solvers that advance a system one accepted step at a time.
pub trait Stepper<T: Scalar> {
    /// Time at the end of the most recent accepted step.
    fn time(&self) -> f64 {
        self.record().t1
    }

    /// State at the end of the most recent accepted step.
    fn state(&self) -> &[T] {
        &self.record().y1
    }

    /// The most recent accepted step. Before the first step this is a
    /// zero-length record holding the initial condition.
    fn record(&self) -> &StepRecord<T>;

    fn stats(&self) -> SolveStats;

    /// Accepted-step budget for one solve.
    fn max_steps(&self) -> usize;

    /// Performs one accepted step.
    /// next_time: the next query time the caller wants covered
    /// t_bound: the step never passes this time; a clipped step lands on it exactly
    fn step<S: OdeSystem<T> + ?Sized>(
        &mut self,
        system: &S,
        next_time: f64,
        t_bound: f64,
    ) -> Result<(), NumericalError>;
}

/// Places the step end on the bound when the step would reach it, cross it,
/// or leave a sliver shorter than 1% of `h` (same slack as Hairer's DOPRI5).
/// Returns the (possibly adjusted) step and its end time.
pub(crate) fn clip_step(t0: f64, h: f64, t_bound: f64) -> (f64, f64) {
    let remaining = t_bound - t0;
    if 1.01 * h.abs() >= remaining.abs() {
        (remaining, t_bound)
    } else {
        (h, t0 + h)
    }
}

/// y0 + sum_j w_j * k_j, with real weights scaled by `h`.
pub(crate) fn combine<T: Scalar>(y0: &[T], h: f64, weights: &[f64], stages: &[Vec<T>]) -> Vec<T> {
    let mut out = y0.to_vec();
    for (w, k) in weights.iter().zip(stages) {
        if *w == 0.0 {
            continue;
        }
        let hw = T::from_real(h * w);
        for i in 0..out.len() {
            out[i] = out[i] + hw * k[i];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complex_modulus_and_finiteness() {
        let z = Complex::new(3.0_f64, 4.0);
        assert!((z.modulus() - 5.0).abs() < 1e-15);
        assert!(z.finite());
        assert!(!Complex::new(f64::NAN, 0.0).finite());
        assert_eq!(<Complex<f32> as Scalar>::from_real(2.0), Complex::new(2.0_f32, 0.0));
    }

    #[test]
    fn eval_counts_and_rejects_non_finite() {
        let system = FnSystem::new(1, |_t: f64, y: &[f64], dydt: &mut [f64]| dydt[0] = 1.0 / y[0]);
        let mut stats = SolveStats::default();
        let out = stats.eval(&system, 0.0, &[2.0]).expect("finite derivative");
        assert_eq!(out, vec![0.5]);
        let err = stats.eval(&system, 1.5, &[0.0]).expect_err("division by zero");
        assert_eq!(err, NumericalError::NonFiniteDerivative { t: 1.5 });
        assert_eq!(stats.nfev, 2);
    }

    #[test]
    fn clip_step_lands_on_bound_in_both_directions() {
        assert_eq!(clip_step(0.0, 0.3, 1.0), (0.3, 0.3));
        assert_eq!(clip_step(0.9, 0.3, 1.0).1, 1.0);
        assert_eq!(clip_step(1.0, -2.0, 0.5), (-0.5, 0.5));
        // 0.1 short of the bound by rounding only: no sliver step
        assert_eq!(clip_step(0.8999999999999999, 0.1, 1.0).1, 1.0);
    }

    #[test]
    fn combine_skips_zero_weights() {
        let y = combine(&[1.0], 0.5, &[2.0, 0.0], &[vec![1.0], vec![f64::NAN]]);
        assert_eq!(y, vec![2.0]);
    }
}
