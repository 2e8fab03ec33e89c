//! Scripted behaviour standing in for generated programs.
//!
//! The headless host cannot execute JavaScript. Instead a program is
//! matched, by a marker string in its source, to a `ProgramScript`
//! describing how its import and render calls behave.

use std::fmt;
use std::rc::Rc;

use crate::error::ImportError;
use crate::protocol::ParameterSet;

use super::document::Placement;

type ParameterCheck = Rc<dyn Fn(&ParameterSet) -> Option<String>>;

#[derive(Clone)]
pub struct ProgramScript {
    pub(crate) import_delay_ms: u64,
    pub(crate) import_error: Option<ImportError>,
    pub(crate) callable_export: bool,
    pub(crate) placement: Placement,
    pub(crate) draws_markup: bool,
    pub(crate) updatable: bool,
    pub(crate) render_failure: Option<ParameterCheck>,
    pub(crate) update_failure: Option<ParameterCheck>,
}

impl Default for ProgramScript {
    /// Imports at once and draws one surface into the container per render.
    fn default() -> Self {
        Self {
            import_delay_ms: 0,
            import_error: None,
            callable_export: true,
            placement: Placement::Container,
            draws_markup: false,
            updatable: false,
            render_failure: None,
            update_failure: None,
        }
    }
}

impl fmt::Debug for ProgramScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramScript")
            .field("import_delay_ms", &self.import_delay_ms)
            .field("import_error", &self.import_error)
            .field("callable_export", &self.callable_export)
            .field("placement", &self.placement)
            .field("draws_markup", &self.draws_markup)
            .field("updatable", &self.updatable)
            .finish_non_exhaustive()
    }
}

impl ProgramScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// The import resolves only after `ms` of virtual time.
    pub fn import_delay(mut self, ms: u64) -> Self {
        self.import_delay_ms = ms;
        self
    }

    pub fn import_fails(mut self, error: ImportError) -> Self {
        self.import_error = Some(error);
        self
    }

    /// `render` is exported but is not a function.
    pub fn non_callable_export(mut self) -> Self {
        self.callable_export = false;
        self
    }

    /// Each render attaches its surface to the document body, hidden.
    pub fn attaches_to_body(mut self) -> Self {
        self.placement = Placement::Body;
        self
    }

    /// Each render appends a plain element to the container instead of a
    /// canvas, and no handle to it is returned (a chart drawn into a `<div>`).
    pub fn draws_markup(mut self) -> Self {
        self.draws_markup = true;
        self
    }

    /// The rendered output exposes an in-place update capability.
    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    /// `render` throws the returned message for matching parameters.
    pub fn render_fails_when(
        mut self,
        check: impl Fn(&ParameterSet) -> Option<String> + 'static,
    ) -> Self {
        self.render_failure = Some(Rc::new(check));
        self
    }

    /// The in-place update throws the returned message for matching parameters.
    pub fn update_fails_when(
        mut self,
        check: impl Fn(&ParameterSet) -> Option<String> + 'static,
    ) -> Self {
        self.update_failure = Some(Rc::new(check));
        self
    }

    pub(crate) fn render_error(&self, params: &ParameterSet) -> Option<String> {
        self.render_failure.as_ref().and_then(|check| check(params))
    }

    pub(crate) fn update_error(&self, params: &ParameterSet) -> Option<String> {
        self.update_failure.as_ref().and_then(|check| check(params))
    }
}
