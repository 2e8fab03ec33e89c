#![allow(dead_code)]

use std::rc::Rc;

use simbox::platform::headless::{Driver, HeadlessHost, VirtualClock};
use simbox::{ControlDescriptor, InitMessage, ParameterSet, Sandbox, SandboxConfig};

/// A valid program tagged with `marker` so the headless host can script it.
pub fn program(marker: &str) -> String {
    format!(
        "// {marker}\nexport function render(el, params) {{\n  \
         const g = params.g ?? 9.81;\n  \
         el.textContent = `g = ${{g}}`;\n}}\n"
    )
}

pub fn params(pairs: &[(&str, f64)]) -> ParameterSet {
    pairs.iter().map(|(name, value)| (*name, *value)).collect()
}

pub fn controls() -> Vec<ControlDescriptor> {
    serde_json::from_str(
        r#"[
            {
                "name": "g", "label": "Gravity",
                "min": 0, "max": 30, "step": 0.1, "value": 9.81, "unit": "m/s²"
            },
            {"name": "m", "label": "Mass", "min": 0.1, "max": 10, "step": 0.1, "value": 1}
        ]"#,
    )
    .unwrap()
}

pub struct Harness {
    pub sandbox: Rc<Sandbox<HeadlessHost>>,
    pub driver: Driver,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_host(|host| host)
    }

    pub fn with_host(configure: impl FnOnce(HeadlessHost) -> HeadlessHost) -> Self {
        Self::with_config(SandboxConfig::default(), configure)
    }

    pub fn with_config(
        config: SandboxConfig,
        configure: impl FnOnce(HeadlessHost) -> HeadlessHost,
    ) -> Self {
        let clock = VirtualClock::new();
        let host = configure(HeadlessHost::new(clock.clone()));
        let sandbox = Rc::new(Sandbox::new(host, config).unwrap());
        Self {
            sandbox,
            driver: Driver::new(clock),
        }
    }

    pub fn host(&self) -> &HeadlessHost {
        self.sandbox.host()
    }

    /// Sends an `init` and runs it as far as it gets without time passing.
    pub fn init(&mut self, code: &str, params: ParameterSet) {
        let sandbox = self.sandbox.clone();
        let message = InitMessage {
            code: code.to_owned(),
            ui_inputs: controls(),
            params,
        };
        assert!(self.driver.spawn(async move { sandbox.init(message).await }));
        self.driver.run_until_stalled();
    }

    pub fn params(&mut self, params: ParameterSet) {
        self.sandbox.params(params);
        self.driver.run_until_stalled();
    }

    pub fn run_for(&mut self, ms: u64) {
        self.driver.run_for(ms);
    }

    pub fn active_surfaces(&self) -> usize {
        self.host().document().active_surfaces()
    }

    pub fn status_text(&self) -> Option<String> {
        self.host().document().status().map(ToString::to_string)
    }
}
