//! pinstall - Install Python packages and record them in requirements.txt

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pinstall::commands::{self, InstallOptions, OutputFormat};
use pinstall::config;
use pinstall::installer::Installer;

#[derive(Parser)]
#[command(name = "pinstall")]
#[command(author, version, about = "Install Python packages and add them to requirements.txt")]
struct Cli {
    /// Packages to install, e.g. requests or "numpy==1.26.0"
    #[arg(required = true, value_name = "PACKAGE_SPEC")]
    packages: Vec<String>,

    /// Manifest file to update (default: requirements.txt)
    #[arg(short = 'r', long = "requirement", value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Record the installed version for packages given without one
    #[arg(long)]
    pin: bool,

    /// Show what would change without installing or writing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,

    /// Config file (default: ./pinstall.toml, then ~/.pinstall/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pinstall=debug" } else { "pinstall=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    let config = config::load_config(cli.config.as_deref(), &cwd)?;

    let options = InstallOptions {
        specs: commands::parse_specs(&cli.packages)?,
        manifest: cli.manifest.unwrap_or_else(|| config.manifest.clone()),
        pin: cli.pin || config.pin,
        dry_run: cli.dry_run,
    };
    let installer = Installer::from_config(&config);

    let report = commands::install(&options, &installer)?;

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Summary
    };
    commands::print_report(&report, format)
}

/// Map the first pinstall error in the chain to its exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<pinstall::Error>())
        .map(|e| u8::try_from(e.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}
