use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use simbox::diagnostics::render_report;
use simbox::loader::DataUrl;
use simbox::platform::headless::{Driver, HeadlessHost, VirtualClock};
use simbox::protocol::{GeneratedProgram, control_issues};
use simbox::{InboundMessage, Sandbox, SandboxConfig, Transformer, ValidationFailure, Validator};

#[derive(Parser)]
#[command(name = "simbox")]
#[command(about = "Check, transform and replay generated simulation programs")]
struct Cli {
    /// TOML sandbox configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a module (.js/.mjs) or a generator response (.json)
    Check {
        file: PathBuf,
        /// Print a machine readable verdict
        #[arg(long)]
        json: bool,
    },
    /// Print the module the sandbox would load
    Transform {
        file: PathBuf,
        /// Print it as the data URL that gets imported
        #[arg(long)]
        data_url: bool,
    },
    /// Feed a JSON-lines message script through a headless sandbox
    Replay {
        script: PathBuf,
        /// Virtual time to let pass after each message
        #[arg(long, default_value_t = 0)]
        advance_ms: u64,
    },
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { file, json } => check(&config, &file, json),
        Commands::Transform { file, data_url } => transform(&config, &file, data_url),
        Commands::Replay { script, advance_ms } => replay(config, &script, advance_ms),
    }
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    let Some(path) = path else {
        return Ok(SandboxConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// The program source plus its controls when the file is a generator response.
fn read_program(path: &Path) -> Result<(String, Option<GeneratedProgram>)> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if path.extension().is_some_and(|extension| extension == "json") {
        let generated: GeneratedProgram = serde_json::from_str(&text)
            .with_context(|| format!("parsing generator response {}", path.display()))?;
        Ok((generated.code.clone(), Some(generated)))
    } else {
        Ok((text, None))
    }
}

fn check(config: &SandboxConfig, path: &Path, as_json: bool) -> Result<ExitCode> {
    let (source, generated) = read_program(path)?;
    let validator = Validator::new(config)?;
    let transformer = Transformer::new(config);
    let probe = HeadlessHost::new(VirtualClock::new());

    let warnings: Vec<String> = generated
        .as_ref()
        .map(|generated| {
            control_issues(&generated.ui_inputs)
                .iter()
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let verdict = validator.vet(&source, &transformer, &probe);
    let filename = path.display().to_string();

    if as_json {
        let output = match &verdict {
            Ok(program) => json!({
                "ok": true,
                "warnings": warnings,
                "report": {
                    "importsStripped": program.report.imports_stripped,
                    "constructsNeutralized": program.report.constructs_neutralized,
                    "redeclarationsRemoved": program.report.redeclarations_removed,
                },
            }),
            Err(failure) => json!({
                "ok": false,
                "warnings": warnings,
                "error": {
                    "kind": failure_kind(failure),
                    "message": failure.to_string(),
                    "span": failure.span().map(|span| [span.start, span.end]),
                },
            }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for warning in &warnings {
            eprintln!("warning: {warning}");
        }
        match &verdict {
            Ok(_) => println!("ok"),
            Err(failure) => eprint!("{}", render_report(failure, &filename, &source)?),
        }
    }

    Ok(if verdict.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn failure_kind(failure: &ValidationFailure) -> &'static str {
    match failure {
        ValidationFailure::Forbidden { .. } => "forbidden",
        ValidationFailure::Export { .. } => "export",
        ValidationFailure::Syntax { .. } => "syntax",
    }
}

fn transform(config: &SandboxConfig, path: &Path, data_url: bool) -> Result<ExitCode> {
    let (source, _) = read_program(path)?;
    let program = Transformer::new(config).transform(&source);
    if data_url {
        println!("{}", DataUrl::encode(&program.module_source));
    } else {
        print!("{}", program.module_source);
    }
    Ok(ExitCode::SUCCESS)
}

fn replay(config: SandboxConfig, path: &Path, advance_ms: u64) -> Result<ExitCode> {
    let script = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let clock = VirtualClock::new();
    let mut driver = Driver::new(clock.clone());
    let sandbox = Rc::new(Sandbox::new(HeadlessHost::new(clock), config)?);

    for (index, line) in script.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let message = InboundMessage::from_json(line)
            .with_context(|| format!("{}:{line_number}: invalid message", path.display()))?;
        let kind = message.kind();
        match message {
            InboundMessage::Init(init) => {
                let sandbox = sandbox.clone();
                anyhow::ensure!(
                    driver.spawn(async move { sandbox.init(init).await }),
                    "executor rejected the init task"
                );
            }
            InboundMessage::Params { params } => sandbox.params(params),
            InboundMessage::Unknown => {
                log::warn!("line {line_number}: ignoring message of unknown type")
            }
        }
        driver.run_until_stalled();
        if advance_ms > 0 {
            driver.run_for(advance_ms);
        }

        let document = sandbox.host().document();
        let status = document
            .status()
            .map(|status| format!(", status \"{status}\""))
            .unwrap_or_default();
        println!(
            "{line_number}: {kind} -> {:?}, generation {}, surfaces {}, params {}{status}",
            sandbox.phase(),
            sandbox.generation(),
            document.active_surfaces(),
            sandbox.current_params(),
        );
    }
    Ok(ExitCode::SUCCESS)
}
