use std::collections::BTreeMap;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use strata_reconciler::assemble::Assembler;
use strata_reconciler::error::StrataError;
use strata_reconciler::project;

#[derive(Parser)]
#[command(name = "strata-rec")]
#[command(about = "Reconcile archive spreadsheets and checksum manifests into package/resource records")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run reconciliation over a local metadata directory")]
    Ingest(IngestArgs),
    #[command(about = "Classify a single filename against a project's patterns")]
    Classify(ClassifyArgs),
    #[command(about = "List registered project descriptors")]
    Projects,
}

#[derive(Args)]
struct IngestArgs {
    project: String,
    path: Utf8PathBuf,

    /// Dump the full package and resource collections instead of a summary.
    #[arg(long)]
    json_full: bool,
}

#[derive(Args)]
struct ClassifyArgs {
    project: String,
    filename: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<StrataError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &StrataError) -> u8 {
    match error {
        StrataError::UnknownProject(_) | StrataError::UnclassifiedFilename(_) => 2,
        StrataError::IdentityConflict { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => ingest(args),
        Commands::Classify(args) => classify(args),
        Commands::Projects => projects(),
    }
}

fn ingest(args: IngestArgs) -> miette::Result<()> {
    let descriptor = project::descriptor(&args.project).into_diagnostic()?;
    let assembler = Assembler::new(descriptor, Vec::new(), None, BTreeMap::new());
    let output = assembler.ingest(&args.path).into_diagnostic()?;

    if args.json_full {
        print_json(&output)?;
    } else {
        let summary = serde_json::json!({
            "project": args.project,
            "packages": output.packages.len(),
            "resources": output.resources.len(),
            "other_role": output.other_role.len(),
            "anomalies": output.anomalies,
        });
        print_json(&summary)?;
    }
    Ok(())
}

fn classify(args: ClassifyArgs) -> miette::Result<()> {
    let descriptor = project::descriptor(&args.project).into_diagnostic()?;
    match descriptor.patterns.classify(&args.filename) {
        Some(attrs) => print_json(&attrs),
        None if descriptor.patterns.is_skipped(&args.filename) => {
            print_json(&serde_json::json!({ "skipped": args.filename }))
        }
        None => Err(StrataError::UnclassifiedFilename(args.filename)).into_diagnostic(),
    }
}

fn projects() -> miette::Result<()> {
    let names: Vec<&str> = project::registry()
        .into_diagnostic()?
        .iter()
        .map(|descriptor| descriptor.name)
        .collect();
    print_json(&names)
}

fn print_json<T: serde::Serialize>(value: &T) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}
