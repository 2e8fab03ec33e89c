//! Hosts the sandbox can run on.

pub mod headless;

#[cfg(target_arch = "wasm32")]
pub mod browser;
