//! Web worker entry point for docscan pipeline processing.
//!
//! This crate compiles to a standalone WASM module that runs inside a
//! `Worker`. It receives a scan request via `postMessage`, runs
//! [`docscan_pipeline::handle_request`], and posts the response back.
//!
//! Message protocol: the main thread sends a JS object with
//! - `id`: any value, echoed back unchanged
//! - `width`, `height`: numbers
//! - `buffer`: `ArrayBuffer` (or typed array) of RGBA pixels
//! - `mode`: `"original" | "gray" | "bw" | "auto"`
//! - `doCrop`: truthy to detect and rectify the page
//!
//! On success the worker responds with `{ id, width, height, buffer,
//! fallback }`, with `buffer` an `ArrayBuffer` placed in the transfer
//! list. On any failure it responds with `{ id, error }`.
//!
//! Running the pipeline in a worker keeps the browser's main thread
//! free for UI updates and user interaction.

use docscan_pipeline::{ScanRequest, ScanResponse, handle_request};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// # Worker entry point
///
/// Called automatically when the WASM module is instantiated in the
/// worker context.
#[wasm_bindgen(start)]
pub fn worker_main() {
    console_error_panic_hook::set_once();

    let Some(global) = worker_scope() else {
        web_sys::console::error_1(&JsValue::from_str(
            "docscan-worker: not running in a DedicatedWorkerGlobalScope",
        ));
        return;
    };

    let onmessage =
        Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
            handle_message(&event);
        });
    global.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget(); // lives for the worker lifetime
}

fn worker_scope() -> Option<web_sys::DedicatedWorkerGlobalScope> {
    js_sys::global().dyn_into().ok()
}

/// Handle one incoming request.
///
/// The pipeline runs synchronously and blocks this worker thread only.
fn handle_message(event: &web_sys::MessageEvent) {
    let data = event.data();
    let id = field(&data, "id");
    let request = read_request(&data, &id);
    let response = handle_request(request);
    if let Err(err) = post_response(&id, response) {
        web_sys::console::error_2(&JsValue::from_str("docscan-worker: postMessage failed"), &err);
    }
}

/// Read a field, treating a non-object message as having no fields.
fn field(data: &JsValue, key: &str) -> JsValue {
    if !data.is_object() {
        return JsValue::UNDEFINED;
    }
    js_sys::Reflect::get(data, &JsValue::from_str(key)).unwrap_or(JsValue::UNDEFINED)
}

/// Build a [`ScanRequest`] from a JS message. Missing or mistyped
/// fields are left empty so the pipeline rejects them with a proper
/// failure response.
fn read_request(data: &JsValue, id: &JsValue) -> ScanRequest {
    ScanRequest {
        id: id_string(id),
        width: field(data, "width").as_f64().and_then(to_dimension),
        height: field(data, "height").as_f64().and_then(to_dimension),
        buffer: read_buffer(&field(data, "buffer")),
        mode: field(data, "mode").as_string(),
        do_crop: field(data, "doCrop").is_truthy(),
    }
}

fn id_string(id: &JsValue) -> String {
    id.as_string()
        .or_else(|| id.as_f64().map(|n| n.to_string()))
        .unwrap_or_default()
}

/// Accept whole, non-negative numbers that fit in a `u32`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_dimension(value: f64) -> Option<u32> {
    (value.is_finite() && value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value))
        .then(|| value as u32)
}

/// Copy pixels out of an `ArrayBuffer` or typed array.
fn read_buffer(value: &JsValue) -> Option<Vec<u8>> {
    if let Some(buffer) = value.dyn_ref::<js_sys::ArrayBuffer>() {
        return Some(js_sys::Uint8Array::new(buffer).to_vec());
    }
    if js_sys::ArrayBuffer::is_view(value) {
        return Some(js_sys::Uint8Array::new(value).to_vec());
    }
    None
}

/// Post a response, echoing the request's original `id` value.
fn post_response(id: &JsValue, response: ScanResponse) -> Result<(), JsValue> {
    let global = worker_scope().ok_or_else(|| JsValue::from_str("not in worker scope"))?;
    let message = js_sys::Object::new();
    let set = |key: &str, val: &JsValue| js_sys::Reflect::set(&message, &JsValue::from_str(key), val);

    set("id", id)?;
    match response {
        ScanResponse::Success {
            width,
            height,
            buffer,
            fallback,
            ..
        } => {
            let pixels = js_sys::Uint8Array::from(buffer.as_slice()).buffer();
            set("width", &JsValue::from_f64(f64::from(width)))?;
            set("height", &JsValue::from_f64(f64::from(height)))?;
            set("buffer", &pixels)?;
            set("fallback", &JsValue::from_bool(fallback))?;
            let transfer = js_sys::Array::of1(&pixels);
            global.post_message_with_transfer(&message, &transfer)
        }
        ScanResponse::Failure { error, .. } => {
            set("error", &JsValue::from_str(&error))?;
            global.post_message(&message)
        }
    }
}
