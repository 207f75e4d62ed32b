use clap::{Parser, Subcommand};
use datachat::config::Config;
use datachat::dataset;
use datachat::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Natural-language analytics chat over a transaction dataset
#[derive(Parser)]
#[command(name = "datachat")]
#[command(about = "Ask questions about tabular transaction data in plain English", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat server (default command)
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Path to the transaction CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Keep at most this many rows in memory (deterministic sample)
        #[arg(long)]
        sample: Option<usize>,

        /// Seed for the deterministic sample
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("datachat started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Some(Commands::Serve {
            port,
            data,
            sample,
            seed,
        }) => run_serve(port, data, sample, seed).await,
        None => {
            eprintln!("Usage: datachat serve --data <transactions.csv>");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_serve(
    port: u16,
    data: PathBuf,
    sample: Option<usize>,
    seed: u64,
) -> anyhow::Result<()> {
    let config = Config {
        port,
        data_path: data,
        sample_size: sample,
        sample_seed: seed,
        ..Config::from_env()
    };

    info!("loading dataset from {}", config.data_path.display());
    let mut table = dataset::load_csv(&config.data_path)?;
    if let Some(n) = config.sample_size {
        table = table.sample(n, config.sample_seed);
        info!("sampled down to {} rows (seed {})", table.row_count(), config.sample_seed);
    }
    info!("loaded {} transactions", table.row_count());

    let base = Arc::new(table);
    let state = Arc::new(AppState::new(&config, base));
    server::serve(state, config.port).await
}
