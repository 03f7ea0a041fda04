use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use funding_rotator::config::BotConfig;
use funding_rotator::engine::RotationEngine;
use funding_rotator::logging::init_logging;
use funding_rotator::state::StatePersistor;
use funding_rotator::{build_venues, display};

/// Cross-venue delta-neutral funding rotation engine.
#[derive(Parser, Debug)]
#[command(name = "funding-rotator", version)]
struct Args {
    /// Path of the persistent bot state file.
    #[arg(long, default_value = "bot_state.json")]
    state_file: PathBuf,

    /// Path of the configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging("funding-rotator");

    display::print_header("DELTA-NEUTRAL FUNDING ROTATOR");
    log::info!("funding-rotator starting…");

    let config = BotConfig::load(&args.config);
    let persistor = StatePersistor::load(&args.state_file, &config);
    let venues = build_venues(&config);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Termination signal received; shutting down after the current step.");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut engine = RotationEngine::new(config, venues, persistor, shutdown);
    match engine.run().await {
        Ok(()) => {
            log::info!("Clean shutdown. Open positions (if any) were left in place.");
        }
        Err(e) => {
            log::error!("Fatal: {}", e);
            engine.record_fatal(&format!("{}", e)).await;
            std::process::exit(1);
        }
    }
}
