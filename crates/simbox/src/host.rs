//! The seam between the lifecycle and whatever actually runs programs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::ImportError;
use crate::loader::DataUrl;
use crate::protocol::{ControlDescriptor, ParameterSet};
use crate::validator::SyntaxProbe;

pub type LocalFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

pub const LOADING_MESSAGE: &str = "Loading simulation...";

/// Text shown inside the host container. Always inserted as text, never markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Loading(String),
    Error(String),
    /// Non-destructive; shown next to a still valid output.
    Notice(String),
}

impl Status {
    pub fn loading() -> Self {
        Self::Loading(LOADING_MESSAGE.to_owned())
    }

    /// CSS class hosts give the status element.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Loading(_) => "loading",
            Self::Error(_) => "error",
            Self::Notice(_) => "notice",
        }
    }

    /// Loading and error statuses replace the container content.
    pub fn replaces_output(&self) -> bool {
        !matches!(self, Self::Notice(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading(message) | Self::Notice(message) => f.write_str(message),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Passed to every render invocation instead of a process-wide parameter slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderContext {
    pub params: ParameterSet,
    pub generation: u64,
    pub controls: Vec<ControlDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The output has no update capability; fall back to a re-render.
    Unsupported,
    Failed(String),
}

/// What one render invocation produced, with handles to everything it created.
pub trait RenderOutput {
    /// Applies new parameters to the live output, keeping its animation state.
    fn update_in_place(&self, context: &RenderContext) -> UpdateOutcome;

    /// Tears down the instances and surfaces this output owns.
    fn dispose(&self);
}

/// Execution environment for generated programs.
///
/// Implementations are single-threaded; futures they return are polled
/// on the same event loop that calls the synchronous methods.
pub trait Host: SyntaxProbe {
    type Module;
    type Entry: Clone;
    type Output: RenderOutput;

    fn sleep(&self, ms: u64) -> LocalFuture<'_, ()>;

    /// Whether the optional host libraries are available yet.
    fn libraries_ready(&self) -> bool;

    /// Starts loading the libraries from `scripts`, tried in order.
    fn request_libraries(&self, scripts: &[String]);

    fn import_module(&self, url: &DataUrl) -> LocalFuture<'_, Result<Self::Module, ImportError>>;

    /// The module's `render` export, if it is callable.
    fn render_entry(&self, module: &Self::Module) -> Option<Self::Entry>;

    fn render(&self, entry: &Self::Entry, context: &RenderContext) -> Result<Self::Output, String>;

    /// Moves surfaces attached outside the container into it and makes them visible.
    fn adopt(&self, output: &Self::Output);

    /// Keeps only the most recent surface in the container.
    fn remove_stray_surfaces(&self, output: &Self::Output);

    fn clear_container(&self);

    fn show_status(&self, status: &Status);

    /// Removes a status left next to the output, if any.
    fn clear_status(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text() {
        assert_eq!(Status::loading().to_string(), "Loading simulation...");
        assert_eq!(Status::Error("boom".into()).to_string(), "Error: boom");
        assert!(!Status::Notice("kept".into()).replaces_output());
        assert_eq!(Status::Error(String::new()).class_name(), "error");
    }
}
