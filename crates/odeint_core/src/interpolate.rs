//! Step records and dense output.
//!
//! Every accepted step produces a [`StepRecord`] that owns whatever the method
//! needs to evaluate the solution anywhere inside the step without calling the
//! derivative again. Each method family supplies its own basis with an accuracy
//! order matching the stepping formula.

use crate::solvers::newton::basis_integrals;
use crate::traits::{combine, Scalar};

/// Interpolation data for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum DenseOutput<T> {
    /// Zero-length record (the initial condition).
    Point,
    /// Straight line between the endpoints (forward Euler).
    Linear,
    /// `y0 + theta*h*f0 + theta^2*(y1 - y0 - h*f0)` (midpoint).
    Quadratic { f0: Vec<T> },
    /// Third-order continuous extension of the classical RK4 stages.
    ClassicalRk4 { k: Vec<Vec<T>> },
    /// Polynomial in `theta`, coefficients from constant to quartic term.
    Quartic { coeffs: Vec<Vec<T>> },
    /// Tsitouras' continuous extension over the seven stages.
    Tsit5 { k: Vec<Vec<T>> },
    /// `y0 + integral from t0 to t` of a Newton-form derivative polynomial.
    Adams { nodes: Vec<f64>, coeffs: Vec<Vec<T>> },
}

/// One accepted integration step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord<T> {
    pub t0: f64,
    pub t1: f64,
    pub y0: Vec<T>,
    pub y1: Vec<T>,
    /// Method order used for this step.
    pub order: usize,
    pub dense: DenseOutput<T>,
}

impl<T: Scalar> StepRecord<T> {
    pub fn initial(t0: f64, y0: Vec<T>) -> Self {
        Self {
            t0,
            t1: t0,
            y1: y0.clone(),
            y0,
            order: 0,
            dense: DenseOutput::Point,
        }
    }

    /// Signed step length.
    pub fn h(&self) -> f64 {
        self.t1 - self.t0
    }

    /// True when `t` lies inside the closed step interval.
    pub fn covers(&self, t: f64) -> bool {
        let (lo, hi) = if self.t0 <= self.t1 {
            (self.t0, self.t1)
        } else {
            (self.t1, self.t0)
        };
        t >= lo && t <= hi
    }

    /// Solution at `t`. Endpoints return the stored states exactly.
    pub fn interpolate(&self, t: f64) -> Vec<T> {
        debug_assert!(
            self.covers(t),
            "t = {t} outside step [{}, {}]",
            self.t0,
            self.t1
        );
        if t == self.t1 {
            return self.y1.clone();
        }
        if t == self.t0 {
            return self.y0.clone();
        }

        let h = self.h();
        let theta = (t - self.t0) / h;
        match &self.dense {
            DenseOutput::Point => self.y1.clone(),
            DenseOutput::Linear => {
                let w = T::from_real(theta);
                self.y0
                    .iter()
                    .zip(&self.y1)
                    .map(|(&a, &b)| a + w * (b - a))
                    .collect()
            }
            DenseOutput::Quadratic { f0 } => {
                let th = T::from_real(theta * h);
                let hh = T::from_real(h);
                let t2 = T::from_real(theta * theta);
                (0..self.y0.len())
                    .map(|i| {
                        let curvature = self.y1[i] - self.y0[i] - hh * f0[i];
                        self.y0[i] + th * f0[i] + t2 * curvature
                    })
                    .collect()
            }
            DenseOutput::ClassicalRk4 { k } => {
                let t2 = theta * theta;
                let t3 = t2 * theta;
                let b1 = theta - 1.5 * t2 + 2.0 * t3 / 3.0;
                let b23 = t2 - 2.0 * t3 / 3.0;
                let b4 = -0.5 * t2 + 2.0 * t3 / 3.0;
                combine(&self.y0, h, &[b1, b23, b23, b4], k)
            }
            DenseOutput::Quartic { coeffs } => {
                let w = T::from_real(theta);
                let mut out = coeffs[coeffs.len() - 1].clone();
                for c in coeffs.iter().rev().skip(1) {
                    for i in 0..out.len() {
                        out[i] = c[i] + w * out[i];
                    }
                }
                out
            }
            DenseOutput::Tsit5 { k } => combine(&self.y0, h, &tsit5_weights(theta), k),
            DenseOutput::Adams { nodes, coeffs } => {
                let w = basis_integrals(nodes, self.t0, t, coeffs.len());
                combine(&self.y0, 1.0, &w, coeffs)
            }
        }
    }
}

/// Quartic through `y0`, `y_mid`, `y1` matching `f0` and `f1` at the ends.
pub(crate) fn quartic_fit<T: Scalar>(
    y0: &[T],
    y1: &[T],
    y_mid: &[T],
    f0: &[T],
    f1: &[T],
    h: f64,
) -> DenseOutput<T> {
    let n = y0.len();
    let hh = T::from_real(h);
    let r = T::from_real;
    let mut coeffs = vec![Vec::with_capacity(n); 5];
    for i in 0..n {
        let (a0, a1, am, d0, d1) = (y0[i], y1[i], y_mid[i], hh * f0[i], hh * f1[i]);
        coeffs[0].push(a0);
        coeffs[1].push(d0);
        coeffs[2].push(d1 - r(4.0) * d0 - r(11.0) * a0 - r(5.0) * a1 + r(16.0) * am);
        coeffs[3].push(r(5.0) * d0 - r(3.0) * d1 + r(18.0) * a0 + r(14.0) * a1 - r(32.0) * am);
        coeffs[4].push(r(2.0) * (d1 - d0) - r(8.0) * (a1 + a0) + r(16.0) * am);
    }
    DenseOutput::Quartic { coeffs }
}

/// Stage weights `b_i(theta)` of the Tsit5 continuous extension.
fn tsit5_weights(theta: f64) -> [f64; 7] {
    let t = theta;
    let t2 = t * t;
    [
        -1.0530884977290216 * t * (t - 1.3299890189751412) * (t2 - 1.4364028541716351 * t + 0.7139816917074209),
        0.1017 * t2 * (t2 - 2.1966568338249754 * t + 1.2949852507374631),
        2.490627285651252793 * t2 * (t2 - 2.38535645472061657 * t + 1.57803468208092486),
        -16.54810288924490272 * (t - 1.21712927295533244) * (t - 0.61620406037800089) * t2,
        47.37952196281928122 * (t - 1.203071208372362603) * (t - 0.658047292653547382) * t2,
        -34.87065786149660974 * (t - 1.2) * (t - 0.666666666666666667) * t2,
        2.5 * (t - 1.0) * (t - 0.6) * t2,
    ]
}
