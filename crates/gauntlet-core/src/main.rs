//! `gauntlet` command-line interface

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use gauntlet_artifact::GeneratedArtifact;
use gauntlet_core::{check_declared_schemas, Harness, HarnessConfig, ProgressEvent, VerdictPolicy};
use gauntlet_sandbox::{BackendKind, SessionId};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("gauntlet")
        .version(gauntlet_core::VERSION)
        .about("Sandboxed protocol-compliance harness for generated tool servers")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Build, launch and exercise an artifact")
                .arg(
                    Arg::new("artifact")
                        .required(true)
                        .help("Artifact JSON file"),
                )
                .arg(
                    Arg::new("backend")
                        .long("backend")
                        .value_parser(["container", "process"])
                        .help("Execution backend (overrides config)"),
                )
                .arg(
                    Arg::new("verdict")
                        .long("verdict")
                        .value_parser(["all-tools", "check-threshold"])
                        .help("Verdict used for the exit code (overrides config)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-schema")
                .about("Check declared tool schemas without running anything")
                .arg(
                    Arg::new("artifact")
                        .required(true)
                        .help("Artifact JSON file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the schema reports as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("check-schema", args)) => check_schema(args),
        _ => Ok(false),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_artifact(path: &Path) -> Result<GeneratedArtifact> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read artifact {}", path.display()))?;
    GeneratedArtifact::from_json(&text)
        .with_context(|| format!("invalid artifact {}", path.display()))
}

async fn run(args: &ArgMatches) -> Result<bool> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::new(),
    };
    if let Some(backend) = args.get_one::<String>("backend") {
        config = config.with_backend(backend.parse::<BackendKind>()?);
    }
    match args.get_one::<String>("verdict").map(String::as_str) {
        Some("all-tools") => config = config.with_verdict(VerdictPolicy::AllTools),
        Some("check-threshold") => config = config.with_verdict(VerdictPolicy::CheckThreshold),
        Some(other) => bail!("unknown verdict {other}"),
        None => {}
    }

    let artifact_path = args
        .get_one::<String>("artifact")
        .context("missing artifact path")?;
    let artifact = load_artifact(Path::new(artifact_path))?;

    let policy = config.verdict;
    let options = config.options.clone();
    let harness = Arc::new(Harness::new(config));
    let session_id = SessionId::new();

    harness.register(
        session_id,
        Arc::new(|event: &ProgressEvent| {
            tracing::info!(
                phase = %event.phase,
                tool_index = ?event.tool_index,
                total_tools = ?event.total_tools,
                "{}",
                event.message
            );
        }),
    );

    let canceller = Arc::clone(&harness);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel(session_id);
        }
    });

    let report = harness.run_session(session_id, &artifact, &options).await;
    interrupt.abort();
    let report = report?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.generate_text());
    }
    Ok(report.passed(policy))
}

fn check_schema(args: &ArgMatches) -> Result<bool> {
    let artifact_path = args
        .get_one::<String>("artifact")
        .context("missing artifact path")?;
    let artifact = load_artifact(Path::new(artifact_path))?;
    let reports = check_declared_schemas(&artifact);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.summary());
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
        }
    }
    Ok(reports.iter().all(|r| r.valid))
}
