//! Expression-defined systems and the `integrate` entry point for JavaScript.

use anyhow::{anyhow, bail, Context};
use odeint_core::equation_engine::ExpressionSystem;
use odeint_core::{
    integrate, ConfigError, Method, OdeSystem, SolverOptions, Tolerance, Trajectory,
    DEFAULT_ATOL, DEFAULT_RTOL,
};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmOdeSystem {
    system: ExpressionSystem,
}

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

pub(crate) fn parse_method(method: Option<&str>) -> anyhow::Result<Option<Method>> {
    method
        .map(|name| name.parse::<Method>())
        .transpose()
        .context("Failed to select an integration method")
}

/// Decodes a JS options object into the family `method` expects.
/// `undefined` and `null` mean "use the defaults".
fn decode_options(method: Option<Method>, options: JsValue) -> anyhow::Result<Option<SolverOptions>> {
    if options.is_undefined() || options.is_null() {
        return Ok(None);
    }
    let Some(method) = method else {
        return Err(ConfigError::OptionsWithoutMethod.into());
    };
    let deserializer = serde_wasm_bindgen::Deserializer::from(options);
    SolverOptions::deserialize_for(method, deserializer)
        .map(Some)
        .map_err(|err| anyhow!("Invalid options for `{method}`: {err}"))
}

/// Accepts a number or an array with one entry per state variable.
fn decode_tolerance(name: &str, value: JsValue, default: f64) -> anyhow::Result<Tolerance> {
    if value.is_undefined() || value.is_null() {
        return Ok(Tolerance::Scalar(default));
    }
    serde_wasm_bindgen::from_value(value).map_err(|err| anyhow!("Invalid {name}: {err}"))
}

impl WasmOdeSystem {
    pub(crate) fn build(
        equations: &[String],
        params: Vec<f64>,
        param_names: Vec<String>,
        var_names: Vec<String>,
    ) -> anyhow::Result<Self> {
        let system = ExpressionSystem::new(equations, var_names, param_names, params)
            .context("Failed to compile equations")?;
        Ok(Self { system })
    }

    pub(crate) fn solve(
        &self,
        y0: &[f64],
        times: &[f64],
        rtol: Tolerance,
        atol: Tolerance,
        method: Option<Method>,
        options: Option<SolverOptions>,
    ) -> anyhow::Result<Trajectory<f64>> {
        integrate(&self.system, y0, times, rtol, atol, method, options)
            .context("Integration failed")
    }

    pub(crate) fn derivative(&self, t: f64, state: &[f64]) -> anyhow::Result<Vec<f64>> {
        let dim = self.system.dimension();
        if state.len() != dim {
            bail!("State has {} values but the system has {dim} variables", state.len());
        }
        let mut dydt = vec![0.0; dim];
        self.system.apply(t, state, &mut dydt);
        Ok(dydt)
    }
}

#[wasm_bindgen]
impl WasmOdeSystem {
    #[wasm_bindgen(constructor)]
    pub fn new(
        equations: Vec<String>,
        params: Vec<f64>,
        param_names: Vec<String>,
        var_names: Vec<String>,
    ) -> Result<WasmOdeSystem, JsValue> {
        console_error_panic_hook::set_once();
        Self::build(&equations, params, param_names, var_names).map_err(to_js_error)
    }

    pub fn dimension(&self) -> usize {
        self.system.dimension()
    }

    #[wasm_bindgen(js_name = varNames)]
    pub fn var_names(&self) -> js_sys::Array {
        self.system
            .var_names()
            .iter()
            .map(|name| JsValue::from_str(name))
            .collect()
    }

    pub fn params(&self) -> Vec<f64> {
        self.system.params().to_vec()
    }

    /// `f(t, state)` for a single point.
    pub fn evaluate(&self, t: f64, state: &[f64]) -> Result<Vec<f64>, JsValue> {
        self.derivative(t, state).map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = setParam)]
    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), JsValue> {
        self.system
            .set_param(name, value)
            .with_context(|| format!("Failed to set parameter `{name}`"))
            .map_err(to_js_error)
    }

    /// Solves from `times[0]` and returns `{ times, states, stats, method }`.
    /// `rtol` and `atol` are numbers or per-variable arrays.
    pub fn integrate(
        &self,
        y0: Vec<f64>,
        times: Vec<f64>,
        rtol: JsValue,
        atol: JsValue,
        method: Option<String>,
        options: JsValue,
    ) -> Result<JsValue, JsValue> {
        let run = || -> anyhow::Result<JsValue> {
            let method = parse_method(method.as_deref())?;
            let options = decode_options(method, options)?;
            let rtol = decode_tolerance("rtol", rtol, DEFAULT_RTOL)?;
            let atol = decode_tolerance("atol", atol, DEFAULT_ATOL)?;
            let trajectory = self.solve(&y0, &times, rtol, atol, method, options)?;
            serde_wasm_bindgen::to_value(&trajectory)
                .map_err(|err| anyhow!("Failed to serialize trajectory: {err}"))
        };
        run().map_err(to_js_error)
    }
}
