//! Main entry point for the volsignal runner
//!
//! Usage: volsignal [--config <file.json>] [--simulate] <SYMBOL>...
//!
//! Runs one orchestration per symbol concurrently and prints each decision
//! as JSON. The oracle API key is read from `VOLSIGNAL_ORACLE_API_KEY`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use volsignal::oracle::{EngineBuilder, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "volsignal")]
#[command(about = "Volatility-aware LONG/SHORT/WAIT signals for exchange symbols")]
struct Args {
    /// JSON engine configuration; defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use a random-walk market feed instead of the exchange
    #[arg(long)]
    simulate: bool,

    /// Symbols to decide on, e.g. BTCUSDT
    #[arg(required = true)]
    symbols: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();
    let symbols: Vec<String> = args.symbols.iter().map(|s| s.to_uppercase()).collect();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Ok(key) = std::env::var("VOLSIGNAL_ORACLE_API_KEY") {
        config.oracle_api_key = Some(key);
    }
    if config.oracle_api_key.is_none() {
        warn!("No oracle API key configured; oracle calls will likely be rejected");
    }

    info!(
        "Starting volsignal for {:?} ({} market data)",
        symbols,
        if args.simulate { "simulated" } else { "live" }
    );

    let orchestrator = Arc::new(EngineBuilder::from_config(config).build_http(args.simulate)?);

    let handles: Vec<_> = symbols
        .into_iter()
        .map(|symbol| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let decision = orchestrator.run_until_signal(&symbol).await;
                (symbol, decision)
            })
        })
        .collect();

    for handle in handles {
        match handle.await {
            Ok((symbol, decision)) => {
                println!(
                    "{}",
                    serde_json::json!({ "symbol": symbol, "decision": decision })
                );
            }
            Err(e) => error!("Orchestration task failed: {}", e),
        }
    }

    info!("Run complete: {:?}", orchestrator.metrics().snapshot());
    Ok(())
}
