use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, HtmlElement};

use crate::host::Status;

const STATUS_CLASS: &str = "simbox-status";

/// The element with `id`, created under `<body>` when the page lacks one.
pub fn container(document: &Document, id: &str) -> Result<HtmlElement, JsValue> {
    if let Some(element) = document.get_element_by_id(id) {
        return element.dyn_into::<HtmlElement>().map_err(JsValue::from);
    }
    let element = document.create_element("div")?;
    element.set_id(id);
    let body = document
        .body()
        .ok_or_else(|| JsValue::from_str("document has no body"))?;
    body.append_child(&element)?;
    log::debug!("created missing container #{id}");
    element.dyn_into::<HtmlElement>().map_err(JsValue::from)
}

pub fn clear(container: &Element) {
    container.set_text_content(None);
}

/// Status text goes in as a text node; program output never becomes markup.
pub fn show_status(
    document: &Document,
    container: &Element,
    status: &Status,
) -> Result<(), JsValue> {
    if status.replaces_output() {
        clear(container);
    } else {
        clear_status(container)?;
    }
    let element = document.create_element("div")?;
    element.class_list().add_2(STATUS_CLASS, status.class_name())?;
    element.set_text_content(Some(&status.to_string()));
    container.append_child(&element)?;
    Ok(())
}

pub fn clear_status(container: &Element) -> Result<(), JsValue> {
    for element in select_all(container, &format!(".{STATUS_CLASS}"))? {
        element.remove();
    }
    Ok(())
}

pub fn select_all(root: &Element, selector: &str) -> Result<Vec<Element>, JsValue> {
    let nodes = root.query_selector_all(selector)?;
    Ok((0..nodes.length())
        .filter_map(|index| nodes.item(index))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .collect())
}

/// Moves `surface` into `container` unless it is already there, and shows it.
pub fn adopt(container: &Element, surface: &Element) -> Result<(), JsValue> {
    let node: &web_sys::Node = surface;
    if !container.contains(Some(node)) {
        log::debug!("moving <{}> into the container", surface.tag_name().to_lowercase());
        container.append_child(surface)?;
    }
    if let Some(surface) = surface.dyn_ref::<HtmlElement>() {
        let style = surface.style();
        style.set_property("display", "block")?;
        style.set_property("visibility", "visible")?;
    }
    Ok(())
}
