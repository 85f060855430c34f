//! Veriflow CLI - batch verification runner
//!
//! Usage:
//!   veriflow-cli run --input <rows.json> [--settings <path>] [--artifacts <dir>]
//!   veriflow-cli resolve --input <rows.json> [--settings <path>]
//!   veriflow-cli help | version

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context};

use veriflow::credentials::{CredentialSource, KeyringCredentialSource};
use veriflow::http::AuthHttpClient;
use veriflow::pipeline::{PipelineConfig, PipelineOrchestrator};
use veriflow::resolver::MetadataResolver;
use veriflow::rows::{self, Row};
use veriflow::settings::Settings;
use veriflow::SubjectMetadata;

const KEYRING_SERVICE: &str = "Veriflow";

#[derive(Debug)]
enum Command {
    Run {
        input: PathBuf,
        settings: Option<PathBuf>,
        artifacts: PathBuf,
    },
    Resolve {
        input: PathBuf,
        settings: Option<PathBuf>,
    },
    Help,
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    match parse_args(&args) {
        Ok(cmd) => match run_command(cmd) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "version" | "--version" | "-V" => Ok(Command::Version),

        "run" => {
            let input = flag_value(args, "--input", "-i")
                .ok_or_else(|| "run requires --input <rows.json>".to_string())?;
            let settings = flag_value(args, "--settings", "-s");
            let artifacts = flag_value(args, "--artifacts", "-a")
                .unwrap_or_else(|| PathBuf::from("artifacts"));
            Ok(Command::Run {
                input,
                settings,
                artifacts,
            })
        }

        "resolve" => {
            let input = flag_value(args, "--input", "-i")
                .ok_or_else(|| "resolve requires --input <rows.json>".to_string())?;
            let settings = flag_value(args, "--settings", "-s");
            Ok(Command::Resolve { input, settings })
        }

        other => Err(format!("Unknown command: {}", other)),
    }
}

fn flag_value(args: &[String], long: &str, short: &str) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == long || a == short)
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

fn run_command(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            println!("veriflow-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Run {
            input,
            settings,
            artifacts,
        } => {
            let settings = load_settings(settings)?;
            let rows = load_rows(&input)?;
            let metadata = resolve_metadata(&settings, &rows)?;

            let orchestrator = PipelineOrchestrator::new();
            let result = orchestrator.run(&PipelineConfig {
                rows,
                metadata,
                settings,
                artifact_dir: artifacts,
            })?;

            println!(
                "ok={} in={} out={} errors={}",
                result.ok, result.counts.rows_in, result.counts.rows_out, result.counts.errors
            );
            for note in &result.notes {
                println!("  {}", note);
            }
            if !result.ok {
                bail!("run completed with ok=false");
            }
            Ok(())
        }
        Command::Resolve { input, settings } => {
            let settings = load_settings(settings)?;
            let rows = load_rows(&input)?;
            let metadata = resolve_metadata(&settings, &rows)?;

            let mut entries: Vec<&SubjectMetadata> = metadata.values().collect();
            entries.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
            for entry in entries {
                println!(
                    "{}\t{}\t{} alternates",
                    entry.subject_id,
                    if entry.canonical_email.is_empty() {
                        "<no email>"
                    } else {
                        &entry.canonical_email
                    },
                    entry.alternate_emails.len()
                );
            }
            Ok(())
        }
    }
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<Settings> {
    let path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };
    Settings::from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn default_settings_path() -> anyhow::Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("no config directory available"))?;
    Ok(config_dir.join("veriflow").join("settings.yaml"))
}

fn load_rows(path: &PathBuf) -> anyhow::Result<Vec<Row>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input rows from {}", path.display()))?;
    let rows: Vec<Row> =
        serde_json::from_str(&content).context("input must be a JSON array of objects")?;
    Ok(rows)
}

fn resolve_metadata(
    settings: &Settings,
    rows: &[Row],
) -> anyhow::Result<std::collections::HashMap<String, SubjectMetadata>> {
    let base_url = settings
        .service_url
        .clone()
        .ok_or_else(|| anyhow!("settings file is missing service_url"))?;
    let subject_ids = rows::subject_ids(rows, &settings.subject_column);

    let credential = match &settings.connection_id {
        Some(connection_id) => KeyringCredentialSource::new(KEYRING_SERVICE).get(connection_id)?,
        None => None,
    };
    if credential.is_none() {
        tracing::info!("no credential configured, relying on ambient authentication");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let metadata = runtime.block_on(async {
        let http = AuthHttpClient::new(None)?;
        let resolver = MetadataResolver::new(http);
        resolver
            .resolve(&subject_ids, &base_url, credential, |done, total| {
                tracing::info!("resolved {}/{} subjects", done, total);
            })
            .await
    })?;
    Ok(metadata)
}

fn print_help() {
    println!("veriflow-cli - batch eligibility verification");
    println!();
    println!("Commands:");
    println!("  run --input <rows.json> [--settings <path>] [--artifacts <dir>]");
    println!("      Resolve metadata, apply verification rules, write artifacts");
    println!("  resolve --input <rows.json> [--settings <path>]");
    println!("      Resolve metadata only and print a per-subject summary");
    println!("  help");
    println!("  version");
    println!();
    println!("Settings default to <config-dir>/veriflow/settings.yaml");
    println!("Set RUST_LOG=info for progress logging");
}
