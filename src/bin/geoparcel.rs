use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geoparcel::config::ConfigLoader;
use geoparcel::domain::parse_project_ids;
use geoparcel::output::JsonOutput;
use geoparcel::pallet::Pallet;
use geoparcel::pipeline::DownloadPipeline;
use geoparcel::workspace::SourceWorkspace;

#[derive(Parser)]
#[command(name = "geoparcel")]
#[command(about = "Stage and deliver project-scoped GIS data as zipped GeoPackages")]
#[command(version, author)]
struct Cli {
    /// Path to geoparcel.json (defaults to the current directory)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build and zip a spatial data package for a set of projects")]
    Download(DownloadArgs),
    #[command(about = "Work with staging pallets")]
    Pallet(PalletArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// Comma-separated project ids, e.g. 17,23,105
    #[arg(long)]
    projects: String,

    /// Named source environment from the config
    #[arg(long)]
    env: Option<String>,

    /// Scratch directory for the package (defaults to the user cache)
    #[arg(long)]
    out: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct PalletArgs {
    #[command(subcommand)]
    command: PalletCommand,
}

#[derive(Subcommand)]
enum PalletCommand {
    #[command(about = "Ship a pallet's crates into its staging rack")]
    Ship(PalletShipArgs),
}

#[derive(Args)]
struct PalletShipArgs {
    /// Pallet name from the config
    #[arg(long)]
    name: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Download(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            let environment = config.environment(args.env.as_deref())?;
            let project_ids = parse_project_ids(&args.projects)?;

            let workspace = match environment.kind {
                Some(kind) => SourceWorkspace::open_with_kind(
                    &environment.workspace,
                    &environment.prefix,
                    kind,
                )?,
                None => SourceWorkspace::open(&environment.workspace, &environment.prefix)?,
            };
            let scratch = match args.out {
                Some(out) => out,
                None => DownloadPipeline::default_scratch_dir()?,
            };

            let mut pipeline = DownloadPipeline::new(workspace, scratch);
            let result = pipeline.execute(&project_ids)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
        }
        Commands::Pallet(args) => match args.command {
            PalletCommand::Ship(ship) => {
                let config = ConfigLoader::resolve(cli.config.as_deref())?;
                let entry = config.pallet(&ship.name)?;
                let result = Pallet::from_entry(entry).ship()?;
                JsonOutput::print_pallet(&result).into_diagnostic()?;
            }
        },
    }

    Ok(())
}
