use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "dockscan",
    version,
    about = "Read manifest numbers and model labels from label photos"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline config (TOML). Defaults to `dockscan.toml` in the user config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Brand catalog (TOML, `[[brand]]` tables). Defaults to `brands.toml` in the user config dir.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Brand profile id; the built-in default profile when omitted.
    #[arg(long, global = true)]
    brand: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan label photos with a bounded worker pool
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Worker count (overrides `batch.workers`)
        #[arg(long)]
        workers: Option<usize>,
        /// Also write a CSV report here
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Print full outcomes as JSON instead of one line per image
        #[arg(long)]
        json: bool,
    },
    /// Scan every image dropped into a folder until interrupted
    Watch { dir: PathBuf },
    /// Run the capture quality gate on one frame
    Assess {
        image: PathBuf,
        /// Frame-to-frame motion (0..1) to assume
        #[arg(long, default_value_t = 0.0)]
        motion: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = commands::Settings::load(cli.config, cli.catalog, cli.brand)?;

    match cli.command {
        Command::Scan { files, workers, csv, json } => {
            commands::scan(&settings, files, workers, csv, json).await
        }
        Command::Watch { dir } => commands::watch(&settings, &dir).await,
        Command::Assess { image, motion } => commands::assess(&settings, &image, motion),
    }
}
