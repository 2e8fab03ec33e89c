//! The sandbox iframe host.
//!
//! Imports transformed programs from data URLs, renders them into the
//! configured container and turns window `message` events into sandbox
//! messages. Uncaught errors and unhandled rejections on the window are
//! stopped there and shown as the sandbox's error state.

use std::rc::Rc;

use js_sys::{Function, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::JsCast;
use wasm_bindgen::convert::FromWasmAbi;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    Document, Element, ErrorEvent, HtmlElement, MessageEvent, PromiseRejectionEvent, Window,
};

use crate::channel::{MessageSender, message_channel};
use crate::config::SandboxConfig;
use crate::error::ImportError;
use crate::host::{Host, LocalFuture, RenderContext, RenderOutput, Status, UpdateOutcome};
use crate::lifecycle::Sandbox;
use crate::loader::DataUrl;
use crate::protocol::InboundMessage;
use crate::validator::SyntaxProbe;

pub mod console;
mod dom;
mod libraries;

use libraries::LibraryRoot;

const CONFIG_ELEMENT_ID: &str = "simbox-config";

#[wasm_bindgen(inline_js = "export function import_module(url) { return import(url); }")]
extern "C" {
    fn import_module(url: &str) -> Promise;
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = Function)]
    type ProbeFunction;

    /// Parses `body` without running it.
    #[wasm_bindgen(constructor, catch, js_class = "Function")]
    fn new(body: &str) -> Result<ProbeFunction, JsValue>;
}

fn error_message(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

fn error_name(value: &JsValue) -> Option<String> {
    value
        .dyn_ref::<js_sys::Error>()
        .map(|error| String::from(error.name()))
}

fn number_property(value: &JsValue, name: &str) -> Option<u32> {
    Reflect::get(value, &JsValue::from_str(name))
        .ok()
        .and_then(|number| number.as_f64())
        .map(|number| number as u32)
}

fn import_error(value: &JsValue) -> ImportError {
    let error = ImportError::new(error_message(value));
    match (number_property(value, "lineNumber"), number_property(value, "columnNumber")) {
        (Some(line), Some(column)) => error.at(line, column),
        _ => error,
    }
}

/// Calls `remove()` on each library instance that has one.
fn remove_instances(instances: &[JsValue]) {
    for instance in instances {
        let remove = Reflect::get(instance, &JsValue::from_str("remove"))
            .ok()
            .and_then(|remove| remove.dyn_into::<Function>().ok());
        if let Some(remove) = remove {
            if let Err(error) = remove.call0(instance) {
                log::warn!("disposing a library instance failed: {}", error_message(&error));
            }
        }
    }
}

fn to_js(value: &impl Serialize) -> Result<JsValue, String> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|error| error.to_string())
}

pub struct BrowserHost {
    window: Window,
    document: Document,
    container: HtmlElement,
    libraries: LibraryRoot,
    surface_selector: String,
    instance_property: String,
    update_method: String,
}

impl BrowserHost {
    pub fn new(config: &SandboxConfig) -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;
        let container = dom::container(&document, &config.container_id)?;
        let globals: Vec<String> =
            config.globals.iter().map(|global| global.global.clone()).collect();
        Ok(Self {
            libraries: LibraryRoot::install(&config.library_root, &globals),
            window,
            document,
            container,
            surface_selector: config.surface_selector.clone(),
            instance_property: config.instance_property.clone(),
            update_method: config.update_method.clone(),
        })
    }

    pub fn container(&self) -> &HtmlElement {
        &self.container
    }
}

pub struct BrowserOutput {
    container: HtmlElement,
    instances: Vec<JsValue>,
    instance_property: String,
    update_method: String,
}

impl BrowserOutput {
    /// Surfaces of the captured library instances (their `canvas`).
    fn surfaces(&self) -> Vec<Element> {
        self.instances
            .iter()
            .filter_map(|instance| Reflect::get(instance, &JsValue::from_str("canvas")).ok())
            .filter_map(|canvas| canvas.dyn_into::<Element>().ok())
            .collect()
    }

    /// The instance the program stored on the container, else the last captured one.
    fn updatable_instance(&self) -> Option<(JsValue, Function)> {
        let stored = Reflect::get(&self.container, &JsValue::from_str(&self.instance_property))
            .ok()
            .filter(|instance| instance.is_object());
        stored
            .into_iter()
            .chain(self.instances.iter().rev().cloned())
            .find_map(|instance| {
                let method =
                    Reflect::get(&instance, &JsValue::from_str(&self.update_method)).ok()?;
                let method = method.dyn_into::<Function>().ok()?;
                Some((instance, method))
            })
    }
}

impl RenderOutput for BrowserOutput {
    fn update_in_place(&self, context: &RenderContext) -> UpdateOutcome {
        let Some((instance, method)) = self.updatable_instance() else {
            return UpdateOutcome::Unsupported;
        };
        let params = match to_js(&context.params) {
            Ok(params) => params,
            Err(message) => return UpdateOutcome::Failed(message),
        };
        match method.call1(&instance, &params) {
            Ok(_) => UpdateOutcome::Applied,
            Err(error) => UpdateOutcome::Failed(error_message(&error)),
        }
    }

    fn dispose(&self) {
        remove_instances(&self.instances);
        let property = JsValue::from_str(&self.instance_property);
        let _ = Reflect::delete_property(&self.container, &property);
    }
}

impl SyntaxProbe for BrowserHost {
    fn probe_syntax(&self, body: &str) -> Result<(), String> {
        match ProbeFunction::new(body) {
            Ok(_) => Ok(()),
            // A content security policy without 'unsafe-eval' forbids the probe itself
            Err(error) if error_name(&error).as_deref() == Some("EvalError") => {
                log::warn!("syntax probe unavailable: {}", error_message(&error));
                Ok(())
            }
            Err(error) => Err(error_message(&error)),
        }
    }
}

impl Host for BrowserHost {
    type Module = JsValue;
    type Entry = Function;
    type Output = BrowserOutput;

    fn sleep(&self, ms: u64) -> LocalFuture<'_, ()> {
        let window = self.window.clone();
        let promise = Promise::new(&mut |resolve, _reject| {
            let delay = i32::try_from(ms).unwrap_or(i32::MAX);
            let scheduled =
                window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, delay);
            if let Err(error) = scheduled {
                log::error!("setTimeout failed: {}", error_message(&error));
            }
        });
        Box::pin(async move {
            let _ = JsFuture::from(promise).await;
        })
    }

    fn libraries_ready(&self) -> bool {
        self.libraries.all_present()
    }

    fn request_libraries(&self, scripts: &[String]) {
        libraries::inject_fallback_scripts(&self.document, scripts.into());
    }

    fn import_module(&self, url: &DataUrl) -> LocalFuture<'_, Result<JsValue, ImportError>> {
        let promise = import_module(url.as_str());
        Box::pin(async move { JsFuture::from(promise).await.map_err(|error| import_error(&error)) })
    }

    fn render_entry(&self, module: &JsValue) -> Option<Function> {
        Reflect::get(module, &JsValue::from_str("render"))
            .ok()?
            .dyn_into::<Function>()
            .ok()
    }

    fn render(&self, entry: &Function, context: &RenderContext) -> Result<BrowserOutput, String> {
        let params = to_js(&context.params)?;
        let js_context = to_js(context)?;

        self.libraries.begin_capture();
        let result = entry.call3(&JsValue::NULL, &self.container, &params, &js_context);
        let instances = self.libraries.end_capture();
        if let Err(error) = result {
            // Instances created before the throw are not owned by any output
            remove_instances(&instances);
            return Err(error_message(&error));
        }

        Ok(BrowserOutput {
            container: self.container.clone(),
            instances,
            instance_property: self.instance_property.clone(),
            update_method: self.update_method.clone(),
        })
    }

    fn adopt(&self, output: &BrowserOutput) {
        for surface in output.surfaces() {
            if let Err(error) = dom::adopt(&self.container, &surface) {
                log::warn!("could not adopt surface: {}", error_message(&error));
            }
        }
    }

    fn remove_stray_surfaces(&self, output: &BrowserOutput) {
        let surfaces = match dom::select_all(&self.container, &self.surface_selector) {
            Ok(surfaces) => surfaces,
            Err(error) => {
                log::warn!("surface query failed: {}", error_message(&error));
                return;
            }
        };
        let keep = output.surfaces().pop().or_else(|| surfaces.last().cloned());
        let Some(keep) = keep else {
            return;
        };
        for surface in surfaces.iter().filter(|surface| **surface != keep) {
            surface.remove();
        }
    }

    fn clear_container(&self) {
        dom::clear(&self.container);
    }

    fn show_status(&self, status: &Status) {
        if let Err(error) = dom::show_status(&self.document, &self.container, status) {
            log::error!("could not show status: {}", error_message(&error));
        }
    }

    fn clear_status(&self) {
        if let Err(error) = dom::clear_status(&self.container) {
            log::warn!("could not clear status: {}", error_message(&error));
        }
    }
}

/// Reads the optional JSON configuration embedded in the page.
fn page_config(document: &Document) -> SandboxConfig {
    let Some(text) = document
        .get_element_by_id(CONFIG_ELEMENT_ID)
        .and_then(|element| element.text_content())
    else {
        return SandboxConfig::default();
    };
    SandboxConfig::from_json(&text).unwrap_or_else(|error| {
        log::warn!("ignoring invalid #{CONFIG_ELEMENT_ID}: {error}");
        SandboxConfig::default()
    })
}

fn listen<E: FromWasmAbi + 'static>(
    window: &Window,
    event: &str,
    handler: impl FnMut(E) + 'static,
) {
    let closure = Closure::<dyn FnMut(E)>::new(handler);
    let callback = closure.as_ref().unchecked_ref();
    if let Err(error) = window.add_event_listener_with_callback(event, callback) {
        log::error!("cannot listen for '{event}': {}", error_message(&error));
    }
    closure.forget();
}

fn forward_messages(window: &Window, sender: MessageSender) {
    listen(window, "message", move |event: MessageEvent| {
        let data = event.data();
        let sent = match data.as_string() {
            Some(json) => sender.send_json(&json),
            None => match serde_wasm_bindgen::from_value::<InboundMessage>(data) {
                Ok(message) => sender.send(message),
                Err(error) => {
                    log::warn!("ignoring undecodable message: {error}");
                    Ok(())
                }
            },
        };
        if let Err(error) = sent {
            log::warn!("{error}");
        }
    });
}

fn intercept_uncaught(window: &Window, sandbox: Rc<Sandbox<BrowserHost>>) {
    let on_error = sandbox.clone();
    listen(window, "error", move |event: ErrorEvent| {
        event.prevent_default();
        on_error.report_uncaught(event.message());
    });
    listen(window, "unhandledrejection", move |event: PromiseRejectionEvent| {
        event.prevent_default();
        sandbox.report_uncaught(error_message(&event.reason()));
    });
}

async fn run(host: BrowserHost, config: SandboxConfig) {
    let window = host.window.clone();
    let sandbox = match Sandbox::new(host, config) {
        Ok(sandbox) => Rc::new(sandbox),
        Err(error) => {
            log::error!("{error}");
            return;
        }
    };
    let (sender, channel) = message_channel();
    forward_messages(&window, sender);
    intercept_uncaught(&window, sandbox.clone());
    log::info!("sandbox ready");
    channel.run(&sandbox).await;
}

#[wasm_bindgen(start)]
pub fn start() {
    console::install(log::LevelFilter::Info);
    let Some(document) = web_sys::window().and_then(|window| window.document()) else {
        log::error!("no document; sandbox not started");
        return;
    };
    let config = page_config(&document);
    match BrowserHost::new(&config) {
        Ok(host) => wasm_bindgen_futures::spawn_local(run(host, config)),
        Err(error) => log::error!("cannot start sandbox: {}", error_message(&error)),
    }
}
