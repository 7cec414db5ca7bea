use num_complex::Complex;
use odeint_core::equation_engine::ExpressionSystem;
use odeint_core::{
    integrate, AdaptiveOptions, ConfigError, FixedAdamsOptions, FixedGridOptions, FnSystem, Method,
    NumericalError, OdeSystem, SolveError, SolverOptions, VariableAdamsOptions, DEFAULT_ATOL,
    DEFAULT_RTOL,
};
use std::cell::Cell;

fn decay() -> FnSystem<impl Fn(f64, &[f64], &mut [f64])> {
    FnSystem::new(1, |_t: f64, y: &[f64], dydt: &mut [f64]| dydt[0] = -y[0])
}

/// Counts evaluations independently of the solver statistics.
struct Counted<S> {
    inner: S,
    calls: Cell<usize>,
}

impl<S: OdeSystem<f64>> OdeSystem<f64> for Counted<S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        self.calls.set(self.calls.get() + 1);
        self.inner.apply(t, y, dydt)
    }
}

#[test]
fn default_method_tracks_exponential_decay() {
    let times = [0.0, 1.0, 2.0, 3.0];
    let traj = integrate(&decay(), &[1.0], &times, DEFAULT_RTOL, DEFAULT_ATOL, None, None)
        .expect("decay solve");
    assert_eq!(traj.method, Method::Dopri5);
    assert_eq!(traj.len(), 4);
    for (t, y) in traj.iter() {
        assert!((y[0] - (-t).exp()).abs() < 1e-6, "t = {t}: {}", y[0]);
    }
}

#[test]
fn every_method_solves_decay() {
    let times = [0.0, 0.5, 1.0];
    for method in Method::ALL {
        let options: Option<SolverOptions> = match method {
            Method::Euler | Method::Midpoint | Method::Rk4 => Some(
                FixedGridOptions {
                    step_size: Some(1e-3),
                    ..Default::default()
                }
                .into(),
            ),
            Method::ExplicitAdams | Method::AdamsMoulton => Some(
                FixedAdamsOptions {
                    step_size: Some(1e-2),
                    ..Default::default()
                }
                .into(),
            ),
            _ => None,
        };
        let traj = integrate(&decay(), &[1.0], &times, 1e-8, 1e-10, Some(method), options)
            .unwrap_or_else(|err| panic!("{method}: {err}"));
        let err = (traj.last().expect("final state")[0] - (-1.0_f64).exp()).abs();
        // forward Euler with h = 1e-3 is the loosest of the set
        assert!(err < 5e-4, "{method}: error {err}");
        assert_eq!(traj.state_at(0), Some(&[1.0][..]));
    }
}

#[test]
fn fixed_grid_evaluations_match_stage_count() {
    for (method, stages) in [(Method::Euler, 1), (Method::Midpoint, 2), (Method::Rk4, 4)] {
        let system = Counted {
            inner: decay(),
            calls: Cell::new(0),
        };
        let options = FixedGridOptions {
            step_size: Some(0.125),
            ..Default::default()
        };
        let traj = integrate(&system, &[1.0], &[0.0, 1.0], 1e-6, 1e-9, Some(method), Some(options.into()))
            .expect("fixed grid solve");
        assert_eq!(traj.stats.naccept, 8);
        assert_eq!(system.calls.get(), traj.stats.naccept * stages);
        assert_eq!(traj.stats.nfev, system.calls.get());
    }
}

#[test]
fn tighter_tolerances_do_not_increase_error() {
    let exact = (-5.0_f64).exp();
    for method in [Method::Dopri5, Method::Tsit5, Method::VariableAdams] {
        let mut previous_error = f64::INFINITY;
        let mut previous_steps = 0;
        for tol in [1e-4, 1e-7, 1e-10] {
            let traj = integrate(&decay(), &[1.0], &[0.0, 5.0], tol, tol * 1e-2, Some(method), None)
                .expect("decay solve");
            let err = (traj.states[1][0] - exact).abs();
            assert!(err <= previous_error, "{method} at tol {tol}: {err} > {previous_error}");
            assert!(traj.stats.naccept >= previous_steps);
            previous_error = err;
            previous_steps = traj.stats.naccept;
        }
    }
}

#[test]
fn repeated_solves_are_bit_identical() {
    let times: Vec<f64> = (0..=10).map(|i| i as f64 * 0.3).collect();
    for method in Method::ALL {
        let run = || {
            integrate(&decay(), &[1.0], &times, 1e-6, 1e-9, Some(method), None).expect("solve")
        };
        assert_eq!(run(), run(), "{method}");
    }
}

#[test]
fn single_time_returns_y0_without_evaluations() {
    for method in Method::ALL {
        let system = Counted {
            inner: decay(),
            calls: Cell::new(0),
        };
        let traj = integrate(&system, &[2.5], &[4.0], 1e-6, 1e-9, Some(method), None).expect("trivial solve");
        assert_eq!(traj.states, vec![vec![2.5]]);
        assert_eq!(system.calls.get(), 0);
    }
}

#[test]
fn options_without_method_are_rejected() {
    let system = Counted {
        inner: decay(),
        calls: Cell::new(0),
    };
    let options = FixedGridOptions {
        step_size: Some(0.1),
        ..Default::default()
    };
    let err = integrate(&system, &[1.0], &[0.0, 1.0], 1e-7, 1e-9, None, Some(options.into()))
        .expect_err("ambiguous options");
    assert!(err.is_config());
    assert_eq!(err, SolveError::Config(ConfigError::OptionsWithoutMethod));
    assert_eq!(system.calls.get(), 0);
}

#[test]
fn config_errors_precede_evaluation() {
    let err = integrate(&decay(), &[1.0], &[0.0, 1.0, 0.5], 1e-7, 1e-9, None, None).expect_err("mixed direction");
    assert!(matches!(err, SolveError::Config(ConfigError::NonMonotonicTimes { index: 2, .. })));

    let err = integrate(&decay(), &[1.0], &[], 1e-7, 1e-9, None, None).expect_err("no times");
    assert_eq!(err, SolveError::Config(ConfigError::EmptyTimes));

    let err = integrate(&decay(), &[1.0], &[0.0, 1.0], vec![1e-7, 1e-7], 1e-9, None, None)
        .expect_err("tolerance shape");
    assert!(matches!(err, SolveError::Config(ConfigError::ToleranceShape { .. })));

    let err = integrate(
        &decay(),
        &[1.0],
        &[0.0, 1.0],
        1e-7,
        1e-9,
        Some(Method::Tsit5),
        Some(VariableAdamsOptions::default().into()),
    )
    .expect_err("wrong family");
    assert!(matches!(err, SolveError::Config(ConfigError::OptionsMismatch { .. })));
}

#[test]
fn finite_time_blow_up_is_a_numerical_error() {
    // y' = y^2, y(0) = 1 has y = 1 / (1 - t)
    let system = FnSystem::new(1, |_t: f64, y: &[f64], dydt: &mut [f64]| dydt[0] = y[0] * y[0]);
    for method in [Method::Dopri5, Method::VariableAdams] {
        let err = integrate(&system, &[1.0], &[0.0, 2.0], 1e-6, 1e-9, Some(method), None)
            .expect_err("solution blows up at t = 1");
        assert!(err.is_numerical(), "{method}: {err}");
    }
}

#[test]
fn non_finite_derivative_is_reported() {
    let system = FnSystem::new(1, |t: f64, _y: &[f64], dydt: &mut [f64]| {
        dydt[0] = if t > 0.5 { f64::NAN } else { 1.0 }
    });
    let options = FixedGridOptions {
        step_size: Some(0.25),
        ..Default::default()
    };
    let err = integrate(&system, &[0.0], &[0.0, 1.0], 1e-6, 1e-9, Some(Method::Euler), Some(options.into()))
        .expect_err("nan derivative");
    assert_eq!(
        err,
        SolveError::Numerical(NumericalError::NonFiniteDerivative { t: 0.75 })
    );
}

#[test]
fn rejection_budget_surfaces_as_numerical_error() {
    let options = AdaptiveOptions {
        first_step: Some(50.0),
        max_rejections: 0,
        ..Default::default()
    };
    let err = integrate(&decay(), &[1.0], &[0.0, 50.0], 1e-10, 1e-12, Some(Method::Dopri5), Some(options.into()))
        .expect_err("first step far too large");
    assert!(matches!(
        err,
        SolveError::Numerical(NumericalError::TooManyRejections { .. })
    ));
}

fn bounded_options(method: Method, first_step: Option<f64>, min_step: f64, max_step: Option<f64>) -> SolverOptions {
    match method {
        Method::VariableAdams => VariableAdamsOptions {
            first_step,
            min_step,
            max_step,
            ..Default::default()
        }
        .into(),
        _ => AdaptiveOptions {
            first_step,
            min_step,
            max_step,
            ..Default::default()
        }
        .into(),
    }
}

#[test]
fn max_step_bounds_every_step() {
    let (span, max_step) = (0.5, 0.01);
    for method in [Method::Dopri5, Method::Tsit5, Method::VariableAdams] {
        for first_step in [None, Some(1.0)] {
            let options = bounded_options(method, first_step, 0.0, Some(max_step));
            let traj = integrate(&decay(), &[1.0], &[0.0, span], 1e-3, 1e-6, Some(method), Some(options))
                .expect("bounded solve");
            // the final step may stretch by 1% to land on the bound
            let min_steps = (span / (1.01 * max_step)).ceil() as usize;
            assert!(
                traj.stats.naccept >= min_steps,
                "{method} with first_step {first_step:?}: {} steps",
                traj.stats.naccept
            );
        }
    }
}

#[test]
fn min_step_too_coarse_for_tolerance_exhausts_rejections() {
    for method in [Method::Dopri5, Method::Tsit5, Method::VariableAdams] {
        let options = bounded_options(method, None, 1.0, None);
        let err = integrate(&decay(), &[1.0], &[0.0, 10.0], 1e-12, 1e-14, Some(method), Some(options))
            .expect_err("steps cannot shrink below min_step");
        assert!(
            matches!(err, SolveError::Numerical(NumericalError::TooManyRejections { .. })),
            "{method}: {err}"
        );
    }
}

#[test]
fn backward_integration_with_dense_queries() {
    let times = [0.0, -0.25, -0.5, -1.0];
    for method in [Method::Dopri5, Method::Tsit5, Method::VariableAdams] {
        let traj = integrate(&decay(), &[1.0], &times, 1e-9, 1e-12, Some(method), None).expect("backward solve");
        for (t, y) in traj.iter() {
            assert!((y[0] - (-t).exp()).abs() < 1e-6, "{method} at t = {t}");
        }
    }
}

#[test]
fn per_element_tolerances_and_max_norm() {
    // y'' = -y with y = cos t
    let system = FnSystem::new(2, |_t: f64, y: &[f64], dydt: &mut [f64]| {
        dydt[0] = y[1];
        dydt[1] = -y[0];
    });
    let options = AdaptiveOptions {
        norm: odeint_core::ErrorNorm::Max,
        ..Default::default()
    };
    let traj = integrate(
        &system,
        &[1.0, 0.0],
        &[0.0, std::f64::consts::PI],
        vec![1e-9, 1e-9],
        vec![1e-12, 1e-12],
        Some(Method::Tsit5),
        Some(options.into()),
    )
    .expect("oscillator solve");
    let end = traj.last().expect("final state");
    assert!((end[0] + 1.0).abs() < 1e-6);
    assert!(end[1].abs() < 1e-6);
}

#[test]
fn complex_states_are_supported() {
    // y' = i y, y(0) = 1: y = exp(i t)
    let system = FnSystem::new(1, |_t: f64, y: &[Complex<f64>], dydt: &mut [Complex<f64>]| {
        dydt[0] = Complex::new(0.0, 1.0) * y[0];
    });
    for method in [Method::Dopri5, Method::VariableAdams] {
        let traj = integrate(
            &system,
            &[Complex::new(1.0, 0.0)],
            &[0.0, 1.0, 2.0],
            1e-9,
            1e-12,
            Some(method),
            None,
        )
        .expect("complex solve");
        for (t, y) in traj.iter() {
            let exact = Complex::new(t.cos(), t.sin());
            assert!((y[0] - exact).norm() < 1e-6, "{method} at t = {t}");
        }
    }
}

#[test]
fn expression_systems_integrate() {
    let system = ExpressionSystem::new(
        &["y", "-w^2 * x"],
        vec!["x".into(), "y".into()],
        vec!["w".into()],
        vec![2.0],
    )
    .expect("oscillator equations");
    let traj = integrate(&system, &[1.0, 0.0], &[0.0, 1.0], 1e-9, 1e-12, Some(Method::AdamsMoulton), Some(
        FixedAdamsOptions {
            step_size: Some(1e-3),
            ..Default::default()
        }
        .into(),
    ))
    .expect("expression solve");
    assert!((traj.states[1][0] - 2.0_f64.cos()).abs() < 1e-8);
}

#[test]
fn trajectory_serializes_to_json() {
    let traj = integrate(&decay(), &[1.0], &[0.0, 1.0], 1e-6, 1e-9, Some(Method::Rk4), None).expect("solve");
    let json = serde_json::to_value(&traj).expect("serialize trajectory");
    assert_eq!(json["method"], "rk4");
    assert_eq!(json["times"][1], 1.0);
    assert_eq!(json["stats"]["naccept"], 1);
}
