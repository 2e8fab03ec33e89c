//! The sandbox session: full loads on `init`, in-place updates on `params`.
//!
//! All state lives in one `RefCell` that is never borrowed across a host
//! call or an await point, so host callbacks (uncaught error reports) may
//! re-enter the sandbox at any time.

use std::cell::{Cell, RefCell};
use std::mem;

use futures_util::future;

use crate::config::SandboxConfig;
use crate::error::{ConfigError, SandboxError};
use crate::host::{Host, LocalFuture, RenderContext, RenderOutput, Status, UpdateOutcome};
use crate::loader::Loader;
use crate::protocol::{ControlDescriptor, InitMessage, ParameterSet};
use crate::transformer::Transformer;
use crate::validator::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LibraryWait {
    NotStarted,
    Waiting,
    Done,
}

struct Session<H: Host> {
    phase: Phase,
    generation: u64,
    params: ParameterSet,
    controls: Vec<ControlDescriptor>,
    entry: Option<H::Entry>,
    output: Option<H::Output>,
    deferred_params: bool,
    last_error: Option<SandboxError>,
}

impl<H: Host> Session<H> {
    fn context(&self) -> RenderContext {
        RenderContext {
            params: self.params.clone(),
            generation: self.generation,
            controls: self.controls.clone(),
        }
    }
}

pub struct Sandbox<H: Host> {
    host: H,
    config: SandboxConfig,
    validator: Validator,
    transformer: Transformer,
    loader: Loader,
    libraries: Cell<LibraryWait>,
    session: RefCell<Session<H>>,
}

impl<H: Host> Sandbox<H> {
    pub fn new(host: H, config: SandboxConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            validator: Validator::new(&config)?,
            transformer: Transformer::new(&config),
            loader: Loader::new(config.load_timeout_ms),
            host,
            config,
            libraries: Cell::new(LibraryWait::NotStarted),
            session: RefCell::new(Session {
                phase: Phase::Empty,
                generation: 0,
                params: ParameterSet::new(),
                controls: Vec::new(),
                entry: None,
                output: None,
                deferred_params: false,
                last_error: None,
            }),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn phase(&self) -> Phase {
        self.session.borrow().phase
    }

    pub fn current_params(&self) -> ParameterSet {
        self.session.borrow().params.clone()
    }

    /// Number of `init` messages accepted so far.
    pub fn generation(&self) -> u64 {
        self.session.borrow().generation
    }

    pub fn last_error(&self) -> Option<SandboxError> {
        self.session.borrow().last_error.clone()
    }

    /// Loads a new program, discarding the current session.
    pub async fn init(&self, message: InitMessage) {
        self.begin_init(message).await
    }

    /// Runs the synchronous part of an `init` (teardown, new generation,
    /// validation) and returns the rest of the load.
    ///
    /// Messages handled after this returns already see the `Loading` phase.
    pub fn begin_init(&self, message: InitMessage) -> LocalFuture<'_, ()> {
        let InitMessage {
            code,
            ui_inputs,
            params,
        } = message;

        let (generation, previous) = {
            let mut session = self.session.borrow_mut();
            session.generation += 1;
            session.phase = Phase::Loading;
            session.params = params;
            session.controls = ui_inputs;
            session.entry = None;
            session.deferred_params = false;
            session.last_error = None;
            (session.generation, session.output.take())
        };
        log::info!("init #{generation}: loading program ({} bytes)", code.len());

        if let Some(output) = previous {
            output.dispose();
        }
        self.host.clear_container();
        self.host.show_status(&Status::loading());

        match self.validator.vet(&code, &self.transformer, &self.host) {
            Ok(program) => Box::pin(async move {
                self.wait_for_libraries().await;
                if self.is_superseded(generation) {
                    log::debug!("init #{generation} superseded before import");
                    return;
                }
                let loaded = self.loader.load(&self.host, &program).await;
                if self.is_superseded(generation) {
                    log::debug!("discarding load of superseded init #{generation}");
                    return;
                }
                match loaded {
                    Ok(entry) => self.install(generation, entry),
                    Err(error) => self.fail(generation, error.into()),
                }
            }),
            Err(failure) => {
                log::warn!("init #{generation} rejected: {failure}");
                self.fail(generation, failure.into());
                Box::pin(future::ready(()))
            }
        }
    }

    /// Replaces the parameter set and updates the live output.
    pub fn params(&self, params: ParameterSet) {
        let (entry, output, previous, context) = {
            let mut session = self.session.borrow_mut();
            if session.phase == Phase::Loading {
                log::debug!("deferring params until init #{} is ready", session.generation);
                session.params = params;
                session.deferred_params = true;
                return;
            }
            let Some(entry) = session.entry.clone() else {
                log::debug!("ignoring params: no program loaded");
                return;
            };
            let previous = mem::replace(&mut session.params, params);
            (entry, session.output.take(), previous, session.context())
        };

        match self.apply_update(&entry, output, &context) {
            Ok(output) => {
                self.host.clear_status();
                let mut session = self.session.borrow_mut();
                session.output = Some(output);
                session.phase = Phase::Ready;
                session.last_error = None;
            }
            Err(message) => self.roll_back(&entry, previous, message),
        }
    }

    /// Converts an uncaught error or rejection from generated code into the
    /// error state. The installed entry point is kept.
    ///
    /// While a load is pending the report is dropped: the only program that
    /// could have raised it belongs to the discarded session.
    pub fn report_uncaught(&self, message: impl Into<String>) {
        let error = SandboxError::Runtime {
            message: message.into(),
        };
        let output = {
            let mut session = self.session.borrow_mut();
            if session.phase == Phase::Loading {
                log::warn!(
                    "ignoring error from a replaced program during init #{}: {error}",
                    session.generation
                );
                return;
            }
            session.phase = Phase::Error;
            session.last_error = Some(error.clone());
            session.output.take()
        };
        log::error!("{error}");
        if let Some(output) = output {
            output.dispose();
        }
        self.host.show_status(&Status::Error(error.to_string()));
    }

    /// Polls for the host libraries once per sandbox lifetime; loads that
    /// arrive while the wait runs join it.
    async fn wait_for_libraries(&self) {
        let interval = self.config.library_poll_interval_ms;
        loop {
            match self.libraries.get() {
                LibraryWait::Done => return,
                LibraryWait::Waiting => self.host.sleep(interval).await,
                LibraryWait::NotStarted => break,
            }
        }

        self.libraries.set(LibraryWait::Waiting);
        let mut requested = false;
        let mut ready = false;
        for attempt in 0..self.config.library_poll_attempts {
            if self.host.libraries_ready() {
                ready = true;
                break;
            }
            let waited_ms = u64::from(attempt) * interval;
            if !requested && waited_ms >= self.config.library_fallback_delay_ms {
                log::info!(
                    "host libraries missing after {waited_ms} ms, requesting fallback scripts"
                );
                self.host.request_libraries(&self.config.library_fallback_scripts);
                requested = true;
            }
            self.host.sleep(interval).await;
        }
        if ready || self.host.libraries_ready() {
            log::debug!("host libraries available");
        } else {
            log::warn!(
                "host libraries unavailable after {} attempts, continuing without them",
                self.config.library_poll_attempts
            );
        }
        self.libraries.set(LibraryWait::Done);
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.session.borrow().generation != generation
    }

    fn install(&self, generation: u64, entry: H::Entry) {
        let context = {
            let mut session = self.session.borrow_mut();
            session.entry = Some(entry.clone());
            if mem::take(&mut session.deferred_params) {
                log::debug!("applying deferred params to init #{generation}");
            }
            session.context()
        };

        self.host.clear_container();
        match self.render_and_reconcile(&entry, &context) {
            Ok(output) => {
                log::info!("init #{generation}: rendered");
                let mut session = self.session.borrow_mut();
                session.output = Some(output);
                session.phase = Phase::Ready;
            }
            Err(message) => self.fail(generation, SandboxError::Runtime { message }),
        }
    }

    fn fail(&self, generation: u64, error: SandboxError) {
        log::error!("init #{generation} failed: {error}");
        {
            let mut session = self.session.borrow_mut();
            session.phase = Phase::Error;
            session.last_error = Some(error.clone());
        }
        self.host.show_status(&Status::Error(error.to_string()));
    }

    /// In-place update when the output supports it, otherwise a soft re-render.
    fn apply_update(
        &self,
        entry: &H::Entry,
        output: Option<H::Output>,
        context: &RenderContext,
    ) -> Result<H::Output, String> {
        if let Some(output) = output {
            match output.update_in_place(context) {
                UpdateOutcome::Applied => {
                    self.reconcile(&output);
                    return Ok(output);
                }
                UpdateOutcome::Unsupported => {
                    log::debug!("output has no update capability, re-rendering");
                    output.dispose();
                }
                UpdateOutcome::Failed(message) => {
                    output.dispose();
                    return Err(message);
                }
            }
        }
        // Output the program attached without a handle (charts drawn into
        // plain elements) only goes away with the container content
        self.host.clear_container();
        self.render_and_reconcile(entry, context)
    }

    /// Restores `previous` and renders it again so the output matches a
    /// parameter set that is known to work.
    fn roll_back(&self, entry: &H::Entry, previous: ParameterSet, message: String) {
        let error = SandboxError::Update { message };
        log::warn!("{error}; restoring previous parameters");
        let context = {
            let mut session = self.session.borrow_mut();
            session.params = previous;
            session.last_error = Some(error.clone());
            session.context()
        };

        self.host.clear_container();
        match self.render_and_reconcile(entry, &context) {
            Ok(output) => {
                {
                    let mut session = self.session.borrow_mut();
                    session.output = Some(output);
                    session.phase = Phase::Ready;
                }
                let notice = format!("{error}. Previous parameters restored.");
                self.host.show_status(&Status::Notice(notice));
            }
            Err(retry) => {
                log::error!("re-render with previous parameters failed: {retry}");
                self.session.borrow_mut().phase = Phase::Error;
                self.host.show_status(&Status::Error(error.to_string()));
            }
        }
    }

    fn render_and_reconcile(
        &self,
        entry: &H::Entry,
        context: &RenderContext,
    ) -> Result<H::Output, String> {
        let output = self.host.render(entry, context)?;
        self.reconcile(&output);
        Ok(output)
    }

    /// Runs after every render: at most one surface, inside the container.
    fn reconcile(&self, output: &H::Output) {
        self.host.adopt(output);
        self.host.remove_stray_surfaces(output);
    }
}
