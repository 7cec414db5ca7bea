use odeint_core::Method;
use wasm_bindgen::prelude::*;

mod system;

pub use system::WasmOdeSystem;

/// Identifiers accepted by `WasmOdeSystem.integrate`, in dispatch order.
#[wasm_bindgen(js_name = methodNames)]
pub fn method_names() -> js_sys::Array {
    Method::ALL
        .iter()
        .map(|method| JsValue::from_str(method.name()))
        .collect()
}
