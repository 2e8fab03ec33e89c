//! Deterministic in-memory host.
//!
//! Runs the full sandbox pipeline (validation, transformation, data URL
//! import, lifecycle) without a JavaScript engine: module behaviour comes
//! from registered [`ProgramScript`]s and time from a [`VirtualClock`].

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures_executor::{LocalPool, LocalSpawner};
use futures_util::future;
use futures_util::task::LocalSpawnExt;

use crate::error::ImportError;
use crate::host::{Host, LocalFuture, RenderContext, RenderOutput, Status, UpdateOutcome};
use crate::loader::DataUrl;
use crate::validator::{SyntaxProbe, check_structure};

pub mod clock;
pub mod document;
pub mod script;

pub use clock::VirtualClock;
pub use document::{
    Document, Invocation, InvocationKind, Placement, Surface, SurfaceId, SurfaceKind,
};
pub use script::ProgramScript;

/// When the optional host libraries show up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryAvailability {
    Present,
    Missing,
    /// Become ready at this virtual time.
    AfterMs(u64),
    /// Become ready once fallback scripts are requested.
    OnRequest,
}

pub struct HeadlessHost {
    clock: VirtualClock,
    document: Rc<RefCell<Document>>,
    scripts: RefCell<Vec<(String, Rc<ProgramScript>)>>,
    libraries: LibraryAvailability,
    requested_libraries: RefCell<Vec<String>>,
    imports: Cell<usize>,
}

impl HeadlessHost {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            document: Rc::new(RefCell::new(Document::new())),
            scripts: RefCell::new(Vec::new()),
            libraries: LibraryAvailability::Present,
            requested_libraries: RefCell::new(Vec::new()),
            imports: Cell::new(0),
        }
    }

    pub fn with_libraries(mut self, libraries: LibraryAvailability) -> Self {
        self.libraries = libraries;
        self
    }

    /// Programs whose source contains `marker` behave as `script`.
    /// Unmatched programs get the default script.
    pub fn register(&self, marker: impl Into<String>, script: ProgramScript) {
        self.scripts.borrow_mut().push((marker.into(), Rc::new(script)));
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn document(&self) -> std::cell::Ref<'_, Document> {
        self.document.borrow()
    }

    pub fn import_count(&self) -> usize {
        self.imports.get()
    }

    pub fn requested_libraries(&self) -> Vec<String> {
        self.requested_libraries.borrow().clone()
    }

    fn script_for(&self, source: &str) -> Rc<ProgramScript> {
        self.scripts
            .borrow()
            .iter()
            .find(|(marker, _)| source.contains(marker.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_default()
    }
}

pub struct HeadlessModule {
    script: Rc<ProgramScript>,
}

#[derive(Clone)]
pub struct HeadlessEntry {
    script: Rc<ProgramScript>,
}

pub struct HeadlessOutput {
    document: Rc<RefCell<Document>>,
    script: Rc<ProgramScript>,
    surfaces: Vec<SurfaceId>,
}

impl HeadlessOutput {
    pub fn surfaces(&self) -> &[SurfaceId] {
        &self.surfaces
    }
}

impl RenderOutput for HeadlessOutput {
    fn update_in_place(&self, context: &RenderContext) -> UpdateOutcome {
        if !self.script.updatable {
            return UpdateOutcome::Unsupported;
        }
        if let Some(message) = self.script.update_error(&context.params) {
            return UpdateOutcome::Failed(message);
        }
        self.document
            .borrow_mut()
            .record(InvocationKind::Update, context.generation, &context.params);
        UpdateOutcome::Applied
    }

    fn dispose(&self) {
        let mut document = self.document.borrow_mut();
        for surface in &self.surfaces {
            document.remove_surface(*surface);
        }
    }
}

impl SyntaxProbe for HeadlessHost {
    fn probe_syntax(&self, body: &str) -> Result<(), String> {
        check_structure(body)
    }
}

impl Host for HeadlessHost {
    type Module = HeadlessModule;
    type Entry = HeadlessEntry;
    type Output = HeadlessOutput;

    fn sleep(&self, ms: u64) -> LocalFuture<'_, ()> {
        Box::pin(self.clock.sleep(ms))
    }

    fn libraries_ready(&self) -> bool {
        match self.libraries {
            LibraryAvailability::Present => true,
            LibraryAvailability::Missing => false,
            LibraryAvailability::AfterMs(at_ms) => self.clock.now_ms() >= at_ms,
            LibraryAvailability::OnRequest => !self.requested_libraries.borrow().is_empty(),
        }
    }

    fn request_libraries(&self, scripts: &[String]) {
        self.requested_libraries.borrow_mut().extend_from_slice(scripts);
    }

    fn import_module(&self, url: &DataUrl) -> LocalFuture<'_, Result<HeadlessModule, ImportError>> {
        self.imports.set(self.imports.get() + 1);
        let Some(source) = url.decode() else {
            return Box::pin(future::ready(Err(ImportError::new("Invalid module URL"))));
        };
        let script = self.script_for(&source);
        let delay = (script.import_delay_ms > 0).then(|| self.clock.sleep(script.import_delay_ms));
        Box::pin(async move {
            if let Some(delay) = delay {
                delay.await;
            }
            match &script.import_error {
                Some(error) => Err(error.clone()),
                None => Ok(HeadlessModule { script }),
            }
        })
    }

    fn render_entry(&self, module: &HeadlessModule) -> Option<HeadlessEntry> {
        module.script.callable_export.then(|| HeadlessEntry {
            script: module.script.clone(),
        })
    }

    fn render(
        &self,
        entry: &HeadlessEntry,
        context: &RenderContext,
    ) -> Result<HeadlessOutput, String> {
        if let Some(message) = entry.script.render_error(&context.params) {
            return Err(message);
        }
        let surfaces = {
            let mut document = self.document.borrow_mut();
            document.record(InvocationKind::Render, context.generation, &context.params);
            if entry.script.draws_markup {
                document.create_markup(context.generation);
                Vec::new()
            } else {
                vec![document.create_surface(entry.script.placement, context.generation)]
            }
        };
        Ok(HeadlessOutput {
            document: self.document.clone(),
            script: entry.script.clone(),
            surfaces,
        })
    }

    fn adopt(&self, output: &HeadlessOutput) {
        let mut document = self.document.borrow_mut();
        for id in &output.surfaces {
            let misplaced = document.surface(*id).is_some_and(|surface| {
                surface.placement != Placement::Container || !surface.visible
            });
            if misplaced {
                log::debug!("moving surface {id:?} into the container");
                document.move_into_container(*id);
            }
        }
    }

    fn remove_stray_surfaces(&self, output: &HeadlessOutput) {
        let mut document = self.document.borrow_mut();
        let keep = output
            .surfaces
            .last()
            .copied()
            .or_else(|| document.latest_container_surface());
        if let Some(keep) = keep {
            let removed = document.keep_only(keep);
            if removed > 0 {
                log::debug!("removed {removed} stray surfaces");
            }
        }
    }

    fn clear_container(&self) {
        self.document.borrow_mut().clear_container();
    }

    fn show_status(&self, status: &Status) {
        let mut document = self.document.borrow_mut();
        if status.replaces_output() {
            document.clear_container();
        }
        document.set_status(status.clone());
    }

    fn clear_status(&self) {
        self.document.borrow_mut().clear_status();
    }
}

/// Single-threaded executor paired with a virtual clock.
pub struct Driver {
    pool: LocalPool,
    clock: VirtualClock,
}

impl Driver {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            pool: LocalPool::new(),
            clock,
        }
    }

    pub fn spawner(&self) -> LocalSpawner {
        self.pool.spawner()
    }

    /// Spawns `task`; returns false if the executor refused it.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) -> bool {
        self.pool.spawner().spawn_local(task).is_ok()
    }

    /// Polls every task until none can make progress without time moving.
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Lets `ms` of virtual time pass, firing timers in deadline order.
    pub fn run_for(&mut self, ms: u64) {
        let target = self.clock.now_ms() + ms;
        loop {
            self.pool.run_until_stalled();
            let now = self.clock.now_ms();
            match self.clock.time_to_next_timer() {
                Some(delay) if now + delay <= target => {
                    self.clock.advance_by(delay);
                }
                _ => {
                    self.clock.advance_by(target - now);
                    self.pool.run_until_stalled();
                    return;
                }
            }
        }
    }
}
