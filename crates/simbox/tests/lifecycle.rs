mod common;

use common::{Harness, params, program};
use simbox::error::{ExportProblem, ImportError, LoadError};
use simbox::platform::headless::{InvocationKind, LibraryAvailability, ProgramScript};
use simbox::{ErrorKind, Phase, SandboxConfig, SandboxError, ValidationFailure};

#[test]
fn valid_program_renders_one_surface() {
    let mut harness = Harness::new();
    harness.init(&program("basic"), params(&[("g", 9.81), ("m", 1.0)]));

    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.active_surfaces(), 1);
    assert_eq!(harness.status_text(), None);
    assert_eq!(harness.sandbox.generation(), 1);
    assert_eq!(harness.host().import_count(), 1);
}

#[test]
fn denied_source_never_reaches_the_loader() {
    let snippets = [
        "fetch('/api')",
        "localStorage.setItem('a', 1)",
        "window.location.href = '/'",
        "eval('2')",
    ];
    for snippet in snippets {
        let mut harness = Harness::new();
        let code = format!("{}\n{snippet};\n", program("denied"));
        harness.init(&code, params(&[]));

        assert_eq!(harness.sandbox.phase(), Phase::Error, "{snippet}");
        assert_eq!(harness.host().import_count(), 0);
        let error = harness.sandbox.last_error().unwrap();
        assert!(matches!(
            error,
            SandboxError::Validation(ValidationFailure::Forbidden { .. })
        ));
        assert!(harness.status_text().unwrap().starts_with("Error: Security violation"));
    }
}

#[test]
fn missing_export_is_reported_differently_from_denied_source() {
    let mut harness = Harness::new();
    harness.init("function render(el, params) {}", params(&[]));

    assert_eq!(harness.host().import_count(), 0);
    assert_eq!(
        harness.sandbox.last_error(),
        Some(SandboxError::Validation(ValidationFailure::Export {
            problem: ExportProblem::Missing,
            span: None,
        }))
    );
    assert_eq!(
        harness.status_text().as_deref(),
        Some("Error: code must export a render function")
    );
}

#[test]
fn syntax_errors_are_caught_by_the_probe() {
    let mut harness = Harness::new();
    harness.init("export function render(el, params) {\n  if (params.g {\n}\n", params(&[]));

    let error = harness.sandbox.last_error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(matches!(error, SandboxError::Validation(ValidationFailure::Syntax { .. })));
    assert_eq!(harness.host().import_count(), 0);
}

#[test]
fn ten_updates_leave_one_surface_and_the_last_parameters() {
    let mut harness = Harness::new();
    harness.init(&program("round-trip"), params(&[("g", 9.81), ("m", 1.0)]));

    let mut last = params(&[]);
    for step in 1..=10 {
        last = params(&[("g", 9.81 + step as f64), ("m", step as f64 / 2.0)]);
        harness.params(last.clone());
        assert_eq!(harness.active_surfaces(), 1, "after update {step}");
    }

    assert_eq!(harness.sandbox.current_params(), last);
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    let document = harness.host().document();
    assert_eq!(document.surfaces().len(), 1);
    assert_eq!(document.invocations().last().map(|call| call.params.clone()), Some(last));
}

#[test]
fn in_place_updates_keep_the_original_surface() {
    let mut harness = Harness::with_host(|host| {
        host.register("animated", ProgramScript::new().updatable());
        host
    });
    harness.init(&program("animated"), params(&[("g", 9.81)]));
    let surface = harness.host().document().latest_container_surface();

    for step in 0..10 {
        harness.params(params(&[("g", step as f64)]));
    }

    let document = harness.host().document();
    assert_eq!(document.latest_container_surface(), surface);
    assert_eq!(document.active_surfaces(), 1);
    let kinds: Vec<_> = document.invocations().iter().map(|call| call.kind).collect();
    assert_eq!(kinds.iter().filter(|kind| **kind == InvocationKind::Render).count(), 1);
    assert_eq!(kinds.iter().filter(|kind| **kind == InvocationKind::Update).count(), 10);
}

#[test]
fn repeating_the_same_params_does_not_duplicate_surfaces() {
    let mut harness = Harness::new();
    harness.init(&program("idempotent"), params(&[("g", 9.81)]));

    let update = params(&[("g", 3.7)]);
    harness.params(update.clone());
    harness.params(update.clone());

    assert_eq!(harness.active_surfaces(), 1);
    assert_eq!(harness.host().document().surfaces().len(), 1);
    assert_eq!(harness.sandbox.current_params(), update);
}

#[test]
fn rerenders_replace_markup_drawn_without_a_handle() {
    let mut harness = Harness::with_host(|host| {
        host.register("chart", ProgramScript::new().draws_markup());
        host
    });
    harness.init(&program("chart"), params(&[("g", 9.81)]));
    assert_eq!(harness.active_surfaces(), 1);

    let update = params(&[("g", 1.62)]);
    harness.params(update.clone());
    harness.params(update);

    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.active_surfaces(), 1);
    let document = harness.host().document();
    assert_eq!(document.surfaces().len(), 1);
    assert!(document.invocations().iter().all(|call| call.kind == InvocationKind::Render));
}

#[test]
fn slow_import_times_out_and_the_sandbox_accepts_the_next_init() {
    let mut harness = Harness::with_host(|host| {
        host.register("slow", ProgramScript::new().import_delay(5_000));
        host
    });
    harness.init(&program("slow"), params(&[]));
    assert_eq!(harness.sandbox.phase(), Phase::Loading);
    assert_eq!(harness.status_text().as_deref(), Some("Loading simulation..."));

    harness.run_for(1_999);
    assert_eq!(harness.sandbox.phase(), Phase::Loading);
    harness.run_for(1);
    assert_eq!(harness.sandbox.phase(), Phase::Error);
    assert_eq!(
        harness.sandbox.last_error(),
        Some(SandboxError::LoadTimeout { after_ms: 2_000 })
    );
    assert_eq!(harness.status_text().as_deref(), Some("Error: Execution timeout (2000 ms)"));

    harness.init(&program("fast"), params(&[("g", 1.6)]));
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    harness.run_for(5_000);
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.active_surfaces(), 1);
}

#[test]
fn superseded_import_has_no_effect() {
    let mut harness = Harness::with_host(|host| {
        host.register("first", ProgramScript::new().import_delay(1_000));
        host
    });
    harness.init(&program("first"), params(&[("g", 1.0)]));
    harness.init(&program("second"), params(&[("g", 2.0)]));
    assert_eq!(harness.sandbox.phase(), Phase::Ready);

    harness.run_for(1_500);

    assert_eq!(harness.sandbox.generation(), 2);
    assert_eq!(harness.sandbox.current_params(), params(&[("g", 2.0)]));
    let document = harness.host().document();
    assert_eq!(document.active_surfaces(), 1);
    assert!(document.surfaces().iter().all(|surface| surface.generation == 2));
    assert!(document.invocations().iter().all(|call| call.generation == 2));
}

#[test]
fn params_during_loading_are_applied_once_ready() {
    let mut harness = Harness::with_host(|host| {
        host.register("deferred", ProgramScript::new().import_delay(500));
        host
    });
    harness.init(&program("deferred"), params(&[("g", 9.81)]));
    harness.params(params(&[("g", 24.79)]));

    assert_eq!(harness.sandbox.phase(), Phase::Loading);
    assert!(harness.host().document().invocations().is_empty());

    harness.run_for(500);
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    let document = harness.host().document();
    assert_eq!(document.invocations().len(), 1);
    assert_eq!(document.invocations()[0].params, params(&[("g", 24.79)]));
}

#[test]
fn errors_from_the_replaced_program_do_not_drop_params_sent_while_loading() {
    let mut harness = Harness::with_host(|host| {
        host.register("reloading", ProgramScript::new().import_delay(500));
        host
    });
    harness.init(&program("reloading"), params(&[("g", 9.81)]));
    harness.sandbox.report_uncaught("old draw loop threw");
    assert_eq!(harness.sandbox.phase(), Phase::Loading);

    harness.params(params(&[("g", 24.79)]));
    harness.run_for(500);

    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.sandbox.current_params(), params(&[("g", 24.79)]));
    assert_eq!(harness.sandbox.last_error(), None);
    let document = harness.host().document();
    assert_eq!(document.invocations().len(), 1);
    assert_eq!(document.invocations()[0].params, params(&[("g", 24.79)]));
}

#[test]
fn params_without_a_program_are_ignored() {
    let mut harness = Harness::new();
    harness.params(params(&[("g", 1.0)]));

    assert_eq!(harness.sandbox.phase(), Phase::Empty);
    assert!(harness.host().document().invocations().is_empty());
}

#[test]
fn surfaces_attached_to_the_body_are_moved_into_the_container_after_every_render() {
    let mut harness = Harness::with_host(|host| {
        host.register("body-canvas", ProgramScript::new().attaches_to_body());
        host
    });
    harness.init(&program("body-canvas"), params(&[("g", 9.81)]));
    assert_eq!(harness.active_surfaces(), 1);

    for g in [1.0, 3.7, 24.79] {
        harness.params(params(&[("g", g)]));
        let document = harness.host().document();
        assert_eq!(document.active_surfaces(), 1);
        assert_eq!(document.surfaces().len(), 1, "no hidden surfaces left behind");
    }
}

#[test]
fn failed_update_restores_previous_parameters() {
    let mut harness = Harness::with_host(|host| {
        host.register(
            "fragile",
            ProgramScript::new().updatable().update_fails_when(|params| {
                (params.get("g")? > 20.0).then(|| "g out of range".to_owned())
            }),
        );
        host
    });
    harness.init(&program("fragile"), params(&[("g", 9.81)]));
    harness.params(params(&[("g", 12.0)]));

    harness.params(params(&[("g", 25.0)]));

    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.sandbox.current_params(), params(&[("g", 12.0)]));
    assert_eq!(harness.active_surfaces(), 1);
    assert_eq!(harness.sandbox.last_error().map(|error| error.kind()), Some(ErrorKind::Update));
    assert_eq!(
        harness.status_text().as_deref(),
        Some("Update failed: g out of range. Previous parameters restored.")
    );
    let last = harness.host().document().invocations().last().cloned().unwrap();
    assert_eq!(last.kind, InvocationKind::Render);
    assert_eq!(last.params, params(&[("g", 12.0)]));

    harness.params(params(&[("g", 3.7)]));
    assert_eq!(harness.status_text(), None);
    assert_eq!(harness.sandbox.last_error(), None);
}

#[test]
fn render_failure_keeps_the_entry_for_later_updates() {
    let mut harness = Harness::with_host(|host| {
        host.register(
            "negative",
            ProgramScript::new().render_fails_when(|params| {
                (params.get("g")? < 0.0).then(|| "negative gravity".to_owned())
            }),
        );
        host
    });
    harness.init(&program("negative"), params(&[("g", -1.0)]));

    assert_eq!(harness.sandbox.phase(), Phase::Error);
    assert_eq!(
        harness.sandbox.last_error(),
        Some(SandboxError::Runtime {
            message: "negative gravity".to_owned()
        })
    );
    assert_eq!(harness.status_text().as_deref(), Some("Error: Runtime error: negative gravity"));

    harness.params(params(&[("g", 9.81)]));
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.active_surfaces(), 1);
}

#[test]
fn uncaught_errors_become_the_error_state() {
    let mut harness = Harness::new();
    harness.init(&program("async-failure"), params(&[("g", 9.81)]));

    harness.sandbox.report_uncaught("Cannot read properties of undefined (reading 'x')");

    assert_eq!(harness.sandbox.phase(), Phase::Error);
    assert_eq!(harness.active_surfaces(), 0);
    assert_eq!(
        harness.status_text().as_deref(),
        Some("Error: Runtime error: Cannot read properties of undefined (reading 'x')")
    );

    harness.params(params(&[("g", 1.0)]));
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
    assert_eq!(harness.active_surfaces(), 1);
}

#[test]
fn non_callable_export_is_a_load_failure() {
    let mut harness = Harness::with_host(|host| {
        host.register("not-a-function", ProgramScript::new().non_callable_export());
        host
    });
    harness.init(&program("not-a-function"), params(&[]));

    assert_eq!(
        harness.sandbox.last_error(),
        Some(SandboxError::Load(LoadError::InvalidExport))
    );
    assert_eq!(harness.status_text().as_deref(), Some("Error: Exported render must be a function"));
}

#[test]
fn import_error_locations_point_at_user_lines() {
    let mut harness = Harness::new();
    let prelude_lines = simbox::Transformer::default()
        .transform(&program("broken-import"))
        .prelude_lines as u32;
    let error = ImportError::new("x is not defined").at(prelude_lines + 3, 5);
    harness
        .host()
        .register("broken-import", ProgramScript::new().import_fails(error));
    harness.init(&program("broken-import"), params(&[]));

    assert_eq!(
        harness.status_text().as_deref(),
        Some("Error: x is not defined (line 3:5)")
    );
    assert_eq!(harness.sandbox.last_error().map(|error| error.kind()), Some(ErrorKind::Load));
}

#[test]
fn new_init_tears_down_the_previous_output_first() {
    let mut harness = Harness::new();
    harness.init(&program("one"), params(&[("g", 1.0)]));
    harness.init("export function render(el) {}", params(&[]));

    assert_eq!(harness.sandbox.phase(), Phase::Error);
    assert_eq!(harness.active_surfaces(), 0, "failed reload must not leave stale output");
}

#[test]
fn missing_libraries_trigger_fallback_scripts_once() {
    let mut harness =
        Harness::with_host(|host| host.with_libraries(LibraryAvailability::OnRequest));
    harness.init(&program("plot"), params(&[]));
    assert_eq!(harness.sandbox.phase(), Phase::Loading);

    harness.run_for(999);
    assert!(harness.host().requested_libraries().is_empty());
    harness.run_for(1);
    assert_eq!(
        harness.host().requested_libraries(),
        SandboxConfig::default().library_fallback_scripts
    );

    harness.run_for(50);
    assert_eq!(harness.sandbox.phase(), Phase::Ready);

    harness.init(&program("plot-again"), params(&[]));
    assert_eq!(harness.sandbox.phase(), Phase::Ready, "libraries are awaited once");
    assert_eq!(
        harness.host().requested_libraries().len(),
        SandboxConfig::default().library_fallback_scripts.len()
    );
}

#[test]
fn absent_libraries_only_delay_loading() {
    let config = SandboxConfig {
        library_poll_attempts: 10,
        ..SandboxConfig::default()
    };
    let mut harness =
        Harness::with_config(config, |host| host.with_libraries(LibraryAvailability::Missing));
    harness.init(&program("no-libraries"), params(&[]));

    harness.run_for(450);
    assert_eq!(harness.sandbox.phase(), Phase::Loading);
    harness.run_for(50);
    assert_eq!(harness.sandbox.phase(), Phase::Ready);
}
