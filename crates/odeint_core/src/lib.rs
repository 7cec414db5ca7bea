pub mod equation_engine;
pub mod error;
pub mod interpolate;
pub mod method;
pub mod odeint;
pub mod solvers;
pub mod tolerance;
/// The `odeint_core` crate is the integration engine behind the odeint workspace.
/// States are generic over real and complex scalars (`f32`, `f64`, `Complex<_>`);
/// time is always `f64`.
///
/// Key components:
/// - **Traits**: `Scalar` (state element abstraction), `OdeSystem` (right-hand sides), `Stepper` (solvers).
/// - **Solvers**: fixed-grid Euler/midpoint/RK4, fixed-order Adams, adaptive Dormand-Prince and
///   Tsitouras pairs, and a variable-order Adams predictor-corrector.
/// - **Dense output**: every accepted step leaves a `StepRecord` that evaluates the solution
///   anywhere inside the step.
/// - **Driver**: `integrate` walks the query times and reports a `Trajectory`.
/// - **Equation Engine**: a bytecode VM turning equation strings into an `OdeSystem`.
pub mod traits;

pub use error::{ConfigError, NumericalError, SolveError};
pub use interpolate::{DenseOutput, StepRecord};
pub use method::{
    build_solver, AdaptiveOptions, FixedAdamsOptions, FixedGridOptions, Method, Solver, SolverOptions,
    VariableAdamsOptions,
};
pub use odeint::{integrate, Trajectory, DEFAULT_ATOL, DEFAULT_RTOL};
pub use tolerance::{ErrorMixer, ErrorNorm, Tolerance};
pub use traits::{FnSystem, OdeSystem, Scalar, SolveStats, Stepper};
