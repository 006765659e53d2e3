use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use clibroker_core::config::load_config;
use clibroker_core::tracing_init::init_tracing;
use clibroker_core::{Broker, Config, global};

#[derive(Parser, Debug)]
#[command(name = "clibroker-demo")]
#[command(version, about = "Show session-grouped terminal I/O", long_about = None)]
struct Args {
    /// Settings file (JSON), applied over the global one
    #[arg(long, env = "CLIBROKER_CONFIG")]
    config: Option<PathBuf>,

    /// Do not flush after bare writes
    #[arg(long)]
    no_autoflush: bool,

    /// Flush after every write inside sessions by default
    #[arg(long)]
    session_autoflush: bool,

    /// Emit JSON log lines on stderr
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    apply_flags(&args, &mut config);
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting clibroker demo");

    if global::install(Broker::stdio(config.broker)).is_err() {
        warn!("Process broker already initialised, using it as is");
    }
    clibroker_cli::run(global::broker()).await?;
    Ok(())
}

/// Command-line flags win over every configuration layer.
fn apply_flags(args: &Args, config: &mut Config) {
    if args.no_autoflush {
        config.broker.autoflush = false;
    }
    if args.session_autoflush {
        config.broker.session_autoflush = true;
    }
    if args.log_json {
        config.logging.json = true;
    }
}
