use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use catalog_sync::app::{App, SyncOptions};
use catalog_sync::catalog::{CatalogClient, CatalogHttpClient};
use catalog_sync::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use catalog_sync::control::ControlStore;
use catalog_sync::error::SyncError;
use catalog_sync::filter::KeywordFilter;
use catalog_sync::output::{JsonOutput, OutputMode, TextOutput};
use catalog_sync::store::SqliteControlStore;

#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(about = "Download keyword-matched catalog CSVs once per version")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, help = "Case-insensitive keyword regex")]
    pattern: Option<String>,

    #[arg(long, global = true)]
    workers: Option<usize>,

    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every new dataset version (default)")]
    Sync,
    #[command(about = "Show what sync would download")]
    Plan,
    #[command(about = "Show the control table")]
    Status,
}

fn main() -> ExitCode {
    let result = run();
    if let Err(report) = &result {
        eprintln!("{report:?}");
    }
    ExitCode::from(exit_status(&result))
}

fn exit_status(result: &miette::Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(report) => report.downcast_ref::<SyncError>().map_or(1, map_exit_code),
    }
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_)
        | SyncError::InvalidConfig(_)
        | SyncError::InvalidPattern(_) => 2,
        SyncError::CatalogHttp(_)
        | SyncError::CatalogStatus { .. }
        | SyncError::CatalogParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let config = ConfigLoader::resolve(
        cli.config.as_deref(),
        ConfigOverrides {
            pattern: cli.pattern,
            workers: cli.workers,
        },
    )?;
    let filter = KeywordFilter::new(&config.pattern)?;
    let app = build_app(&config)?;

    execute(&app, cli.command.unwrap_or(Commands::Sync), &filter, output_mode)
}

fn execute<C: CatalogClient, S: ControlStore>(
    app: &App<C, S>,
    command: Commands,
    filter: &KeywordFilter,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        Commands::Sync => {
            let report = app.sync(filter)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_sync(&report),
                OutputMode::Human => TextOutput::print_sync(&report),
            }
            .into_diagnostic()
        }
        Commands::Plan => {
            let result = app.plan(filter)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_plan(&result),
                OutputMode::Human => TextOutput::print_plan(&result),
            }
            .into_diagnostic()
        }
        Commands::Status => {
            let result = app.status()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_status(&result),
                OutputMode::Human => TextOutput::print_status(&result),
            }
            .into_diagnostic()
        }
    }
}

fn build_app(
    config: &ResolvedConfig,
) -> Result<App<CatalogHttpClient, SqliteControlStore>, SyncError> {
    let client = CatalogHttpClient::new(config.timeout)?;
    let store = SqliteControlStore::open(config.control_db.clone())?
        .with_busy_timeout(config.busy_timeout);
    info!(path = %store.path(), "opened control store");
    Ok(App::new(
        client,
        store,
        SyncOptions {
            metadata_url: config.metadata_url.clone(),
            data_dir: config.data_dir.clone(),
            workers: config.workers,
        },
    ))
}
