use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use roster_reconcile::{
    CurationAction, KnownIdentityRegistry, ReconcileOptions, RecognitionMode, RegistryStore,
    RunReport, SuffixPolicy, reconcile_manifest_to_json,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "roster-reconcile",
    version,
    about = "Reconcile overlapping OCR captures of a scrolling table into one record list"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile the captures listed in a manifest and write a JSON report.
    Run(RunArgs),
    /// Inspect or curate a known-identity registry file.
    Registry(RegistryArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Capture manifest (JSON) listing images and recognized text.
    #[arg(short, long)]
    manifest: PathBuf,

    /// Known-identity registry (JSON). A missing file counts as empty.
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Output report path.
    #[arg(short, long)]
    output: PathBuf,

    /// Metric name, in reading order. Repeatable.
    #[arg(long = "metric")]
    metrics: Vec<String>,

    /// Smallest number accepted as a metric value.
    #[arg(long)]
    min_metric: Option<u64>,

    /// prefer-clean, keep-longer or keep-shorter.
    #[arg(long)]
    suffix_policy: Option<String>,

    /// Segment and recognize captures on worker threads.
    #[arg(long)]
    parallel: bool,

    /// Worker thread cap when --parallel is set.
    #[arg(long, requires = "parallel")]
    threads: Option<usize>,

    /// Enable verbose warning output.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Args)]
struct RegistryArgs {
    /// Registry file to read and update.
    #[arg(short, long)]
    path: PathBuf,

    #[command(subcommand)]
    action: RegistryCommand,
}

#[derive(Debug, Subcommand)]
enum RegistryCommand {
    /// Print the registry as JSON.
    Show,
    AddName { name: String },
    RemoveName { name: String },
    /// Map a raw recognized text onto a canonical name.
    AddCorrection { raw: String, target: String },
    RemoveCorrection { raw: String },
}

fn parse_options(args: &RunArgs) -> Result<ReconcileOptions> {
    let mut options = ReconcileOptions {
        // Manifest text covers whole captures.
        recognition: RecognitionMode::FullCapture,
        parallel: args.parallel,
        max_threads: args.threads,
        ..ReconcileOptions::default()
    };
    if !args.metrics.is_empty() {
        options.metric_names.clone_from(&args.metrics);
    }
    if let Some(floor) = args.min_metric {
        options.min_metric = floor;
    }
    if let Some(policy) = args.suffix_policy.as_deref() {
        options.suffix_policy = SuffixPolicy::from_str(policy)
            .map_err(|error| anyhow!("invalid suffix policy: {error}"))
            .context("failed to parse --suffix-policy")?;
    }
    options.validate().context("invalid run options")?;
    Ok(options)
}

fn load_registry(path: Option<&Path>) -> Result<KnownIdentityRegistry> {
    let Some(path) = path else {
        return Ok(KnownIdentityRegistry::new());
    };
    let store = RegistryStore::open(path)
        .with_context(|| format!("failed to load registry '{}'", path.display()))?;
    Ok(store.registry().clone())
}

fn log_report(report: &RunReport, verbose: bool) {
    if report.cancelled {
        eprintln!(
            "warning: run stopped after {} of {} captures",
            report.captures_processed, report.captures_total
        );
    }
    for gap in &report.overlap.gaps {
        eprintln!(
            "warning: no shared rows between '{}' and '{}'; rows may have been skipped",
            gap.before, gap.after
        );
    }
    if let Some(distance) = report.overlap.recommended_scroll_distance {
        eprintln!("recommended scroll distance: {distance}px");
    }
    if report.warnings.is_empty() {
        return;
    }

    eprintln!("warning: {} issue(s) detected", report.warnings.len());
    if verbose {
        for warning in &report.warnings {
            eprintln!(
                "  - {:?} capture={:?} key={:?} identity={:?}: {}",
                warning.code, warning.capture_id, warning.key, warning.identity, warning.message
            );
        }
    }
}

fn run_reconcile(args: &RunArgs) -> Result<RunReport> {
    let options = parse_options(args)?;
    let registry = load_registry(args.registry.as_deref())?;
    reconcile_manifest_to_json(&args.manifest, &registry, &args.output, &options).with_context(
        || format!("failed to reconcile captures from '{}'", args.manifest.display()),
    )
}

fn run_registry(args: RegistryArgs) -> Result<()> {
    let mut store = RegistryStore::open(&args.path)
        .with_context(|| format!("failed to load registry '{}'", args.path.display()))?;
    let action = match args.action {
        RegistryCommand::Show => {
            println!("{}", serde_json::to_string_pretty(store.registry())?);
            return Ok(());
        }
        RegistryCommand::AddName { name } => CurationAction::AddName(name),
        RegistryCommand::RemoveName { name } => CurationAction::RemoveName(name),
        RegistryCommand::AddCorrection { raw, target } => {
            CurationAction::AddCorrection { raw, target }
        }
        RegistryCommand::RemoveCorrection { raw } => CurationAction::RemoveCorrection(raw),
    };
    store
        .apply(action)
        .with_context(|| format!("failed to update registry '{}'", args.path.display()))
}

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roster_reconcile=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => match run_reconcile(&args) {
            Ok(report) => {
                log_report(&report, args.verbose);
                if report.records.is_empty() {
                    ExitCode::from(2)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(error) => {
                eprintln!("error: {error:#}");
                ExitCode::from(1)
            }
        },
        Commands::Registry(args) => match run_registry(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("error: {error:#}");
                ExitCode::from(1)
            }
        },
    }
}
