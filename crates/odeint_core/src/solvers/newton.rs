//! Newton-form interpolation of derivative history for the Adams family.
//!
//! Nodes may be unevenly spaced. Weights are exact integrals of the Newton
//! basis `w_j(s) = (s - x_0)...(s - x_{j-1})`, so predictor, corrector and
//! dense output all share one polynomial instead of coefficient tables.

use crate::traits::Scalar;

/// Highest supported Adams order; basis polynomials then reach degree 13,
/// the exactness limit of the 7-point Gauss-Legendre rule below.
pub const MAX_ADAMS_ORDER: usize = 12;

const GAUSS_LEGENDRE_7: [(f64, f64); 7] = [
    (-0.949_107_912_342_758_5, 0.129_484_966_168_869_7),
    (-0.741_531_185_599_394_4, 0.279_705_391_489_276_7),
    (-0.405_845_151_377_397_2, 0.381_830_050_505_118_9),
    (0.0, 0.417_959_183_673_469_4),
    (0.405_845_151_377_397_2, 0.381_830_050_505_118_9),
    (0.741_531_185_599_394_4, 0.279_705_391_489_276_7),
    (0.949_107_912_342_758_5, 0.129_484_966_168_869_7),
];

/// Divided differences `f[x_0..x_j]` of vector samples.
#[derive(Debug, Clone)]
pub(crate) struct DividedDifferences<T> {
    pub nodes: Vec<f64>,
    pub coeffs: Vec<Vec<T>>,
}

impl<T: Scalar> DividedDifferences<T> {
    /// Samples are ordered newest first; the first sample becomes `x_0`.
    pub fn new<'a>(samples: impl Iterator<Item = (f64, &'a [T])>) -> Self {
        let (nodes, mut table): (Vec<f64>, Vec<Vec<T>>) =
            samples.map(|(t, f)| (t, f.to_vec())).unzip();
        let m = nodes.len();
        let mut coeffs = Vec::with_capacity(m);
        if m == 0 {
            return Self { nodes, coeffs };
        }
        coeffs.push(table[0].clone());
        for j in 1..m {
            for i in 0..m - j {
                let scale = T::from_real(1.0 / (nodes[i + j] - nodes[i]));
                for e in 0..table[i].len() {
                    table[i][e] = (table[i + 1][e] - table[i][e]) * scale;
                }
            }
            coeffs.push(table[0].clone());
        }
        Self { nodes, coeffs }
    }

    /// Differences `f[x_0..x_{j-1}, t_new]` for `j = 0..=m`, i.e. the Newton
    /// coefficients obtained by appending one node at the end.
    pub fn extend(&self, t_new: f64, f_new: &[T]) -> Vec<Vec<T>> {
        let mut out = Vec::with_capacity(self.nodes.len() + 1);
        out.push(f_new.to_vec());
        for j in 1..=self.nodes.len() {
            let scale = T::from_real(1.0 / (t_new - self.nodes[j - 1]));
            let prev = &out[j - 1];
            let next = prev
                .iter()
                .zip(&self.coeffs[j - 1])
                .map(|(&e, &c)| (e - c) * scale)
                .collect();
            out.push(next);
        }
        out
    }
}

/// `W_j = integral over [a, b] of w_j(s) ds` for `j < count`.
/// `count` may exceed `nodes.len()` by one.
pub(crate) fn basis_integrals(nodes: &[f64], a: f64, b: f64, count: usize) -> Vec<f64> {
    debug_assert!(count <= nodes.len() + 1);
    let mid = 0.5 * (a + b);
    let half = 0.5 * (b - a);
    let mut w = vec![0.0; count];
    for (g, weight) in GAUSS_LEGENDRE_7 {
        let s = mid + half * g;
        let mut basis = 1.0;
        for j in 0..count {
            w[j] += weight * basis;
            if j < nodes.len() {
                basis *= s - nodes[j];
            }
        }
    }
    for v in &mut w {
        *v *= half;
    }
    w
}
