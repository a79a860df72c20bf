use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use file_proxy::{daemon, MasterConfig, WorkerConfig};

#[derive(Parser)]
#[command(name = "file-proxy")]
#[command(about = "Master/worker file distribution proxy")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track workers and proxy downloads to them
    Master {
        /// Configuration file to load
        #[arg(short, long, default_value = "master.yml")]
        config: PathBuf,
    },
    /// Serve local files and announce them to the master
    Worker {
        /// Configuration file to load
        #[arg(short, long, default_value = "worker.yml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Master { config } => {
            let config = MasterConfig::load(&config)?;
            config.log.init()?;
            daemon::run_master(config).await
        }
        Commands::Worker { config } => {
            let config = WorkerConfig::load(&config)?;
            config.log.init()?;
            daemon::run_worker(config).await
        }
    }
}
