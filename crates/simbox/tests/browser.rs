#![cfg(target_arch = "wasm32")]

use simbox::host::{Host, Status};
use simbox::platform::browser::BrowserHost;
use simbox::validator::SyntaxProbe;
use simbox::{InitMessage, ParameterSet, Phase, Sandbox, SandboxConfig};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn config(container_id: &str) -> SandboxConfig {
    SandboxConfig {
        container_id: container_id.to_owned(),
        library_poll_attempts: 0,
        ..SandboxConfig::default()
    }
}

fn gravity(g: f64) -> ParameterSet {
    [("g", g)].into_iter().collect()
}

#[wasm_bindgen_test]
fn probe_uses_the_engine_parser() {
    let host = BrowserHost::new(&config("probe-test")).unwrap();
    assert!(host.probe_syntax("const a = 1;\nreturn a + 1;").is_ok());
    assert!(host.probe_syntax("if (a {").is_err());
}

#[wasm_bindgen_test]
fn status_is_inserted_as_text() {
    let host = BrowserHost::new(&config("status-test")).unwrap();
    host.show_status(&Status::Error("<img src=x onerror=alert(1)>".to_owned()));

    let container = host.container();
    assert_eq!(
        container.text_content().as_deref(),
        Some("Error: <img src=x onerror=alert(1)>")
    );
    assert!(container.query_selector("img").unwrap().is_none());
}

#[wasm_bindgen_test]
async fn imports_renders_and_updates() {
    let config = config("render-test");
    let host = BrowserHost::new(&config).unwrap();
    let sandbox = Sandbox::new(host, config).unwrap();

    sandbox
        .init(InitMessage {
            code: "export function render(el, params) {\n  el.textContent = 'g=' + params.g;\n}\n"
                .to_owned(),
            ui_inputs: Vec::new(),
            params: gravity(9.81),
        })
        .await;
    assert_eq!(sandbox.phase(), Phase::Ready);
    assert_eq!(sandbox.host().container().text_content().as_deref(), Some("g=9.81"));

    sandbox.params(gravity(1.62));
    assert_eq!(sandbox.host().container().text_content().as_deref(), Some("g=1.62"));
}

#[wasm_bindgen_test]
async fn neutralized_eval_surfaces_as_runtime_error() {
    let config = config("neutralized-test");
    let host = BrowserHost::new(&config).unwrap();
    let sandbox = Sandbox::new(host, config).unwrap();

    // A comment between callee and arguments slips past the textual deny-list
    sandbox
        .init(InitMessage {
            code: "export function render(el, params) {\n  window.eval /* split */ ('1');\n}\n"
                .to_owned(),
            ui_inputs: Vec::new(),
            params: ParameterSet::new(),
        })
        .await;
    assert_eq!(sandbox.phase(), Phase::Error);
    let text = sandbox.host().container().text_content().unwrap_or_default();
    assert!(text.contains("eval is not allowed in the sandbox"), "{text}");
}

#[wasm_bindgen_test]
async fn gravity_attribute_follows_params() {
    let config = config("gravity-test");
    let host = BrowserHost::new(&config).unwrap();
    let sandbox = Sandbox::new(host, config).unwrap();

    let code = "export function render(el, params) {\n  \
                el.setAttribute('data-gravity', String(params.gravity));\n}\n";
    let init: InitMessage = serde_json::from_value(serde_json::json!({
        "code": code,
        "uiInputs": [
            {"name": "gravity", "label": "Gravity", "min": 1, "max": 20, "step": 1, "value": 9.81}
        ],
        "params": {"gravity": 9.81}
    }))
    .unwrap();
    sandbox.init(init).await;
    let container = sandbox.host().container().clone();
    assert_eq!(container.get_attribute("data-gravity").as_deref(), Some("9.81"));

    sandbox.params([("gravity", 15.0)].into_iter().collect());
    assert_eq!(container.get_attribute("data-gravity").as_deref(), Some("15"));
    assert_eq!(sandbox.generation(), 1);
}

#[wasm_bindgen_test]
async fn rerender_replaces_appended_markup() {
    let config = config("markup-test");
    let host = BrowserHost::new(&config).unwrap();
    let sandbox = Sandbox::new(host, config).unwrap();

    sandbox
        .init(InitMessage {
            code: "export function render(el, params) {\n  \
                   const plot = document.createElement('div');\n  \
                   plot.textContent = 'g=' + params.g;\n  \
                   el.appendChild(plot);\n}\n"
                .to_owned(),
            ui_inputs: Vec::new(),
            params: gravity(9.81),
        })
        .await;
    assert_eq!(sandbox.phase(), Phase::Ready);

    sandbox.params(gravity(1.62));
    sandbox.params(gravity(1.62));
    let container = sandbox.host().container();
    assert_eq!(container.child_element_count(), 1);
    assert_eq!(container.text_content().as_deref(), Some("g=1.62"));
}

#[wasm_bindgen_test]
async fn instances_created_before_a_throw_are_removed() {
    js_sys::Function::new_no_args(
        "globalThis.__liveSketches = 0;\n\
         globalThis.p5 = class {\n  \
           constructor() { globalThis.__liveSketches += 1; }\n  \
           remove() { globalThis.__liveSketches -= 1; }\n\
         };",
    )
    .call0(&JsValue::NULL)
    .unwrap();

    let config = config("throwing-render-test");
    let host = BrowserHost::new(&config).unwrap();
    let sandbox = Sandbox::new(host, config).unwrap();
    sandbox
        .init(InitMessage {
            code: "export function render(el, params) {\n  \
                   new p5(() => {}, el);\n  \
                   throw new Error('setup failed');\n}\n"
                .to_owned(),
            ui_inputs: Vec::new(),
            params: ParameterSet::new(),
        })
        .await;

    assert_eq!(sandbox.phase(), Phase::Error);
    let live = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("__liveSketches"))
        .unwrap()
        .as_f64();
    assert_eq!(live, Some(0.0));
}
