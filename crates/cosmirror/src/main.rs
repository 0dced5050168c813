use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use cosmirror_core::config::{ResolvedConfig, load_config, normalize_origin};
use cosmirror_core::export::ExportSource;
use cosmirror_core::freshness::SyncMode;
use cosmirror_core::provider::PageProvider;
use cosmirror_core::remote::{CosenseClient, CosenseClientConfig};
use cosmirror_core::sync::{SyncOptions, SyncReport, sync_project};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "cosmirror.toml";

#[derive(Debug, Parser)]
#[command(
    name = "cosmirror",
    version,
    about = "Mirror a Cosense project into a local directory of text, HTML and code files"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "N", help = "Maximum pages processed at once")]
    concurrency: Option<usize>,
    #[arg(long, global = true, value_name = "URL", help = "Cosense server origin")]
    origin: Option<String>,
    #[arg(short, long, global = true, help = "Log progress at info level")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Wipe the destination and mirror every page.
    Clone(ProjectArgs),
    /// Refetch only pages updated since the last run.
    Pull(ProjectArgs),
    /// Rebuild a mirror from a project export file.
    #[command(alias = "json")]
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct ProjectArgs {
    project: String,
    /// Defaults to the project name.
    destination: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    file: PathBuf,
    /// Defaults to the project name recorded in the export.
    destination: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let resolved = resolve_config(&cli)?;
    match cli.command {
        Commands::Clone(args) => run_remote(SyncMode::Clone, args, &resolved),
        Commands::Pull(args) => run_remote(SyncMode::Pull, args, &resolved),
        Commands::Export(args) => run_export(args, &resolved),
    }
}

/// CLI flags > environment > config file > defaults.
fn resolve_config(cli: &Cli) -> Result<ResolvedConfig> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if cli.config.is_some() && !config_path.exists() {
        bail!("config file not found: {}", normalize_path(&config_path));
    }
    let mut resolved = load_config(&config_path)?.resolve()?;

    if let Some(origin) = &cli.origin {
        resolved.origin = normalize_origin(origin)?;
    }
    if let Some(concurrency) = cli.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        resolved.concurrency = concurrency;
    }
    Ok(resolved)
}

fn run_remote(mode: SyncMode, args: ProjectArgs, resolved: &ResolvedConfig) -> Result<()> {
    let client = CosenseClient::new(CosenseClientConfig::from_resolved(resolved), &args.project)?;
    let destination = args
        .destination
        .unwrap_or_else(|| PathBuf::from(client.project_name()));
    let report = sync_project(&client, &sync_options(mode, destination, resolved))?;
    print_report(&report);
    println!("requests: {}", client.request_count());
    Ok(())
}

fn run_export(args: ExportArgs, resolved: &ResolvedConfig) -> Result<()> {
    let source = ExportSource::from_path(&args.file)?;
    let destination = args
        .destination
        .unwrap_or_else(|| PathBuf::from(source.project_name()));
    let report = sync_project(&source, &sync_options(SyncMode::Clone, destination, resolved))?;
    print_report(&report);
    Ok(())
}

fn sync_options(mode: SyncMode, destination: PathBuf, resolved: &ResolvedConfig) -> SyncOptions {
    SyncOptions {
        mode,
        destination,
        concurrency: resolved.concurrency,
        origin: resolved.origin.clone(),
    }
}

fn print_report(report: &SyncReport) {
    println!("project: {}", report.project);
    println!("mode: {}", report.mode.as_str());
    println!("destination: {}", normalize_path(&report.destination));
    println!("listed: {}", report.listed);
    println!("updated: {}", report.updated);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failures.len());
    println!("peak_in_flight: {}", report.peak_in_flight);
    for failure in &report.failures {
        println!("error: {}: {}", failure.title, failure.error);
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
