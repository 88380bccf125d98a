use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use snapsolve_lib::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "snapsolve", version, about = "Capture an exam question, get a structured AI answer")]
struct Cli {
    /// Config file (defaults to ./snapsolve.toml when present)
    #[arg(short, long, env = "SNAPSOLVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for commands on stdin and analyze screenshots (default)
    Run,
    /// Analyze image files from disk as one question
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Test the connection to the configured provider
    Check,
}

async fn start(cli: Cli) -> anyhow::Result<bool> {
    let settings = Settings::load(cli.config.as_deref()).context("configuration error")?;
    snapsolve_lib::logging::init(&settings.logging).context("cannot set up logging")?;
    settings.ensure_dirs().context("cannot create output directories")?;
    log::info!("Starting snapsolve ({})", settings);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            snapsolve_lib::run(&settings).await?;
            Ok(true)
        }
        Command::Analyze { files } => Ok(snapsolve_lib::analyze_files(&settings, &files).await?),
        Command::Check => {
            snapsolve_lib::check(&settings).await?;
            println!("Connection OK ({})", settings.active_model());
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match start(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
