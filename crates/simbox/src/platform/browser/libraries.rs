//! Host library root and fallback script loading.
//!
//! Generated code reads its libraries from the root object, never from
//! the page globals directly. Constructor-style libraries (p5) are wrapped
//! in a `Proxy` so every instance created during a render is captured and
//! handed to the output as an explicit handle.

use std::rc::Rc;

use js_sys::{Array, Reflect};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, HtmlScriptElement};

#[wasm_bindgen(inline_js = r#"
export function install_library_root(rootName, names) {
  const captured = [];
  let capturing = false;
  const proxies = new Map();
  const root = {};
  for (const name of names) {
    Object.defineProperty(root, name, {
      enumerable: true,
      get() {
        const target = globalThis[name];
        if (typeof target !== 'function') return target;
        if (!proxies.has(target)) {
          proxies.set(target, new Proxy(target, {
            construct(library, args, newTarget) {
              const instance = Reflect.construct(library, args, newTarget);
              if (capturing) captured.push(instance);
              return instance;
            },
          }));
        }
        return proxies.get(target);
      },
    });
  }
  globalThis[rootName] = root;
  return {
    begin() { captured.length = 0; capturing = true; },
    end() { capturing = false; return captured.splice(0); },
  };
}
"#)]
extern "C" {
    pub type InstanceCapture;

    fn install_library_root(root_name: &str, names: Array) -> InstanceCapture;

    #[wasm_bindgen(method)]
    fn begin(this: &InstanceCapture);

    #[wasm_bindgen(method)]
    fn end(this: &InstanceCapture) -> Array;
}

pub struct LibraryRoot {
    capture: InstanceCapture,
    globals: Vec<String>,
}

impl LibraryRoot {
    /// `root` is the configured root expression, e.g. `globalThis.__simboxLibraries`.
    pub fn install(root: &str, globals: &[String]) -> Self {
        let root_name = root.strip_prefix("globalThis.").unwrap_or(root);
        let names: Array = globals.iter().map(|name| JsValue::from_str(name)).collect();
        Self {
            capture: install_library_root(root_name, names),
            globals: globals.to_vec(),
        }
    }

    pub fn all_present(&self) -> bool {
        let global = js_sys::global();
        self.globals.iter().all(|name| {
            Reflect::get(&global, &JsValue::from_str(name))
                .map(|value| !value.is_undefined() && !value.is_null())
                .unwrap_or(false)
        })
    }

    pub fn begin_capture(&self) {
        self.capture.begin();
    }

    /// Library instances constructed since `begin_capture`.
    pub fn end_capture(&self) -> Vec<JsValue> {
        self.capture.end().iter().collect()
    }
}

/// Appends `<script>` tags for `scripts`, moving to the next URL whenever one fails.
pub fn inject_fallback_scripts(document: &Document, scripts: Rc<[String]>) {
    inject_from(document.clone(), scripts, 0);
}

fn inject_from(document: Document, scripts: Rc<[String]>, index: usize) {
    let Some(url) = scripts.get(index) else {
        log::warn!("all library fallback scripts failed to load");
        return;
    };
    let script = match document
        .create_element("script")
        .map(|element| element.unchecked_into::<HtmlScriptElement>())
    {
        Ok(script) => script,
        Err(error) => {
            log::error!("cannot create script element: {error:?}");
            return;
        }
    };
    log::info!("loading library script {url}");
    script.set_src(url);

    let retry_document = document.clone();
    let retry_scripts = scripts.clone();
    let on_error = Closure::once_into_js(move || {
        inject_from(retry_document, retry_scripts, index + 1);
    });
    script.set_onerror(Some(on_error.unchecked_ref()));

    if let Some(head) = document.head() {
        if let Err(error) = head.append_child(&script) {
            log::error!("cannot append script element: {error:?}");
        }
    }
}
