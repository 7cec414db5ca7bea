//! Tolerances and the error norm mixer.

use crate::error::ConfigError;
use crate::traits::Scalar;
use serde::{Deserialize, Serialize};

/// Scalar or per-element tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tolerance {
    Scalar(f64),
    PerElement(Vec<f64>),
}

impl From<f64> for Tolerance {
    fn from(value: f64) -> Self {
        Tolerance::Scalar(value)
    }
}

impl From<Vec<f64>> for Tolerance {
    fn from(values: Vec<f64>) -> Self {
        Tolerance::PerElement(values)
    }
}

impl From<&[f64]> for Tolerance {
    fn from(values: &[f64]) -> Self {
        Tolerance::PerElement(values.to_vec())
    }
}

impl Tolerance {
    /// Tolerance for element `i`. Callers must have validated the length.
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Tolerance::Scalar(v) => *v,
            Tolerance::PerElement(vs) => vs[i],
        }
    }

    pub(crate) fn validate(&self, name: &'static str, dim: usize) -> Result<(), ConfigError> {
        let values: &[f64] = match self {
            Tolerance::Scalar(v) => std::slice::from_ref(v),
            Tolerance::PerElement(vs) => {
                if vs.len() != dim {
                    return Err(ConfigError::ToleranceShape {
                        name,
                        expected: dim,
                        got: vs.len(),
                    });
                }
                vs
            }
        };
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::InvalidTolerance { name });
        }
        Ok(())
    }
}

/// How per-element scaled errors are reduced to one number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorNorm {
    /// Root mean square.
    #[default]
    Rms,
    /// Largest element.
    Max,
}

/// Combines absolute and relative tolerances into a single error ratio.
/// A ratio at or below 1 means the error sits inside the envelope.
#[derive(Debug, Clone)]
pub struct ErrorMixer {
    rtol: Tolerance,
    atol: Tolerance,
    norm: ErrorNorm,
}

impl ErrorMixer {
    pub fn new(rtol: Tolerance, atol: Tolerance, norm: ErrorNorm) -> Self {
        Self { rtol, atol, norm }
    }

    /// `atol_i + rtol_i * max(|y0_i|, |y1_i|)`
    pub fn envelope(&self, i: usize, y0: f64, y1: f64) -> f64 {
        self.atol.at(i) + self.rtol.at(i) * y0.max(y1)
    }

    /// Norm of `error / tol` with the envelope built from both endpoint states.
    pub fn error_ratio<T: Scalar>(&self, error: &[T], y0: &[T], y1: &[T]) -> f64 {
        self.reduce(error.iter().enumerate().map(|(i, e)| {
            scaled(e.modulus(), self.envelope(i, y0[i].modulus(), y1[i].modulus()))
        }))
    }

    /// Norm of `v / (atol + rtol * |y|)`; used for initial step selection.
    pub fn scaled_norm<T: Scalar>(&self, v: &[T], y: &[T]) -> f64 {
        self.reduce(v.iter().enumerate().map(|(i, x)| {
            let m = y[i].modulus();
            scaled(x.modulus(), self.envelope(i, m, m))
        }))
    }

    fn reduce(&self, ratios: impl Iterator<Item = f64>) -> f64 {
        match self.norm {
            ErrorNorm::Max => ratios.fold(0.0, f64::max),
            ErrorNorm::Rms => {
                let (sum, n) = ratios.fold((0.0, 0usize), |(s, n), r| (s + r * r, n + 1));
                if n == 0 {
                    0.0
                } else {
                    (sum / n as f64).sqrt()
                }
            }
        }
    }
}

fn scaled(value: f64, tol: f64) -> f64 {
    if tol > 0.0 {
        value / tol
    } else if value == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}
