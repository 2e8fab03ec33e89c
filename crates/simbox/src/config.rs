//! Sandbox configuration.
//!
//! Every field has a default, so an empty document (`{}` or an empty TOML
//! file) yields the stock sandbox.

use serde::{Deserialize, Serialize};

/// A host-provided library binding exposed to generated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryGlobal {
    /// Name generated code refers to.
    pub alias: String,
    /// Property of the library root the alias reads from.
    pub global: String,
}

impl LibraryGlobal {
    pub fn new(alias: impl Into<String>, global: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            global: global.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Id of the element generated programs render into.
    pub container_id: String,
    pub load_timeout_ms: u64,
    pub library_poll_interval_ms: u64,
    pub library_poll_attempts: u32,
    /// Delay before the fallback library scripts are requested.
    pub library_fallback_delay_ms: u64,
    /// Tried in order until one loads.
    pub library_fallback_scripts: Vec<String>,
    /// JS expression evaluating to the object holding the wrapped libraries.
    pub library_root: String,
    pub globals: Vec<LibraryGlobal>,
    /// CSS selector matching output surfaces inside the container.
    pub surface_selector: String,
    /// Container property a program may store its visualization instance in.
    pub instance_property: String,
    /// Method of a visualization instance that applies new parameters in place.
    pub update_method: String,
    /// Additional deny-list regular expressions.
    pub extra_deny_patterns: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            container_id: "simulation".to_owned(),
            load_timeout_ms: 2000,
            library_poll_interval_ms: 50,
            library_poll_attempts: 200,
            library_fallback_delay_ms: 1000,
            library_fallback_scripts: vec![
                "/plotly.min.js".to_owned(),
                "https://cdn.plot.ly/plotly-2.32.1.min.js".to_owned(),
                "https://cdn.jsdelivr.net/npm/plotly.js-dist@2.32.1/plotly.min.js".to_owned(),
                "https://unpkg.com/plotly.js-dist@2.32.1/plotly.min.js".to_owned(),
            ],
            library_root: "globalThis.__simboxLibraries".to_owned(),
            globals: vec![
                LibraryGlobal::new("Plotly", "Plotly"),
                LibraryGlobal::new("p5", "p5"),
            ],
            surface_selector: "canvas".to_owned(),
            instance_property: "p5instance".to_owned(),
            update_method: "updateWithNewProps".to_owned(),
            extra_deny_patterns: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(SandboxConfig::from_json("{}").unwrap(), SandboxConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = SandboxConfig::from_json(r#"{"load_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.load_timeout_ms, 5000);
        assert_eq!(config.container_id, "simulation");
        let aliases: Vec<&str> =
            config.globals.iter().map(|global| global.alias.as_str()).collect();
        assert_eq!(aliases, ["Plotly", "p5"]);
    }
}
