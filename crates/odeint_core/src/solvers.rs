//! Stepping algorithms.
//!
//! Every solver implements [`Stepper`](crate::traits::Stepper): one call
//! performs one accepted step and leaves a [`StepRecord`](crate::interpolate::StepRecord)
//! behind for dense output.

pub mod adams;
pub(crate) mod controller;
pub mod fixed_adams;
pub mod fixed_grid;
pub mod newton;
pub mod runge_kutta;
pub(crate) mod tableau;

pub use adams::{VariableAdamsConfig, VariableAdamsSolver};
pub use fixed_adams::FixedAdamsSolver;
pub use fixed_grid::{FixedGridScheme, FixedGridSolver};
pub use newton::MAX_ADAMS_ORDER;
pub use runge_kutta::{AdaptiveRkConfig, AdaptiveRkSolver};
