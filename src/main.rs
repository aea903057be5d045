//! Instrument personality daemon.
//!
//! ```bash
//! cam_personality run --config config/personality.toml
//! cam_personality query "hdr 9999 1 4.5" --addr 127.0.0.1:6666
//! cam_personality check-defs config/header_telescope.txt config/header_ao188_lgs.txt
//! ```

use anyhow::{Context, Result};
use cam_personality::config::Settings;
use cam_personality::header::card::BLOCK_SIZE;
use cam_personality::header::{AssembledHeader, HeaderDefinitionTable};
use cam_personality::orchestrator::LocalOrchestrator;
use cam_personality::personality::Personality;
use cam_personality::server::query;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "cam_personality", version, about = "Instrument status and header personality")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the personality until interrupted
    Run {
        #[arg(short, long, default_value = cam_personality::config::DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Send one request to a running query server and print the reply
    Query {
        /// Request line, e.g. "hdr 9999 1 4.5"
        request: String,
        #[arg(short, long, default_value = "127.0.0.1:6666")]
        addr: String,
        #[arg(short, long, default_value = "5s", value_parser = humantime_serde::re::humantime::parse_duration)]
        timeout: Duration,
        /// Print a header reply as JSON instead of card text
        #[arg(long)]
        json: bool,
    },
    /// Validate header-definition files
    CheckDefs {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Query {
            request,
            addr,
            timeout,
            json,
        } => {
            init_tracing("warn");
            let response = query(&addr, &request, timeout)
                .await
                .with_context(|| format!("query to {} failed", addr))?;
            print_response(&response, json)
        }
        Command::CheckDefs { files } => {
            init_tracing("info");
            for file in files {
                let table = HeaderDefinitionTable::load(&file)?;
                println!("{}: {} fields", file.display(), table.len());
            }
            Ok(())
        }
    }
}

async fn run(config: PathBuf) -> Result<()> {
    let settings = Settings::load_from(&config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    init_tracing(&settings.application.log_level);

    let ocs = Arc::new(LocalOrchestrator::new(&settings.application.name));
    let mut shutdown_requested = ocs.shutdown_requested();
    let personality = Personality::new(settings, ocs)?;
    personality.start().await?;
    info!("Registered commands: {}", personality.dispatcher().commands().join(", "));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl+C")?;
            info!("Interrupt received, shutting down");
        }
        _ = shutdown_requested.changed() => {
            info!("Shutdown requested by orchestrator");
        }
    }

    if let Err(e) = personality.stop().await {
        error!("Shutdown incomplete: {}", e);
    }
    Ok(())
}

fn print_response(response: &[u8], json: bool) -> Result<()> {
    if response.is_empty() || response.len() % BLOCK_SIZE != 0 {
        print!("{}", String::from_utf8_lossy(response));
        return Ok(());
    }
    let header = AssembledHeader::from_fits_bytes(response);
    if json {
        println!("{}", serde_json::to_string_pretty(&header)?);
        return Ok(());
    }
    for card in header.cards() {
        match &card.value {
            Some(value) => println!("{:<8} = {:<20} / {}", card.key, value.to_string(), card.comment),
            None => println!("{:<8} {}", card.key, card.comment),
        }
    }
    Ok(())
}
