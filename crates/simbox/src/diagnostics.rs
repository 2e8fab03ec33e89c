//! Human-readable reports for rejected programs.

use std::io;

use ariadne::{Config, Label, Report, ReportKind, Source};

use crate::error::{ExportProblem, ValidationFailure};

/// Renders `failure` against `source` as a colourless ariadne report.
pub fn render_report(
    failure: &ValidationFailure,
    filename: &str,
    source: &str,
) -> io::Result<String> {
    let span = failure.span();
    let anchor = span.clone().unwrap_or(0..0);
    let mut report = Report::build(ReportKind::Error, (filename, anchor))
        .with_config(Config::default().with_color(false))
        .with_message(failure.to_string());
    if let Some(span) = span {
        report = report.with_label(Label::new((filename, span)).with_message(label(failure)));
    }
    if let Some(note) = note(failure) {
        report = report.with_note(note);
    }

    let mut bytes = Vec::new();
    report
        .finish()
        .write((filename, Source::from(source)), &mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn label(failure: &ValidationFailure) -> String {
    match failure {
        ValidationFailure::Forbidden { category, .. } => {
            format!("{category} access is forbidden here")
        }
        ValidationFailure::Export { .. } => "this export".to_owned(),
        ValidationFailure::Syntax { message } => message.clone(),
    }
}

fn note(failure: &ValidationFailure) -> Option<&'static str> {
    match failure {
        ValidationFailure::Export {
            problem: ExportProblem::Missing | ExportProblem::UnsupportedForm,
            ..
        } => Some("expected `export function render(el, params) { ... }`"),
        ValidationFailure::Export {
            problem: ExportProblem::MultipleExports { .. },
            ..
        } => Some("host libraries are globals; only `render` may be exported"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DenyCategory;

    #[test]
    fn forbidden_call_is_labelled() {
        let source = "export function render(el, params) {\n  fetch('/api');\n}\n";
        let start = source.find("fetch").unwrap();
        let failure = ValidationFailure::Forbidden {
            rule: "fetch".to_owned(),
            category: DenyCategory::Network,
            span: start..start + 6,
        };
        let report = render_report(&failure, "program.js", source).unwrap();
        assert!(report.contains("Security violation: fetch is not allowed (network)"));
        assert!(report.contains("network access is forbidden here"));
        assert!(report.contains("program.js:2:3"));
    }

    #[test]
    fn spanless_failure_still_reports() {
        let failure = ValidationFailure::Export {
            problem: ExportProblem::Missing,
            span: None,
        };
        let report = render_report(&failure, "program.js", "const x = 1;").unwrap();
        assert!(report.contains("code must export a render function"));
        assert!(report.contains("export function render(el, params)"));
    }
}
