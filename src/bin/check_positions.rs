// Read-only inspector: prints open positions and balances on both
// venues without touching anything.
use clap::Parser;

use funding_rotator::config::BotConfig;
use funding_rotator::display;
use funding_rotator::gateway::Venue;
use funding_rotator::logging::init_logging;
use funding_rotator::{build_venues, venues::Venues};

/// Check current open positions on Aster and Lighter.
#[derive(Parser, Debug)]
#[command(name = "check-positions", version)]
struct Args {
    /// Inspect a single symbol in detail (e.g. BTC or BTCUSDT).
    #[arg(long, short)]
    symbol: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging("check-positions");

    display::print_header("POSITION CHECKER");
    let config = BotConfig::load("config.json");
    let venues = build_venues(&config);

    let result = match &args.symbol {
        Some(symbol) => {
            let base = symbol.trim_end_matches(config.quote.as_str()).to_string();
            check_symbol(&venues, &config, &base).await
        }
        None => check_all(&venues).await,
    };

    if let Err(e) = result {
        log::error!("Position check failed: {}", e);
        std::process::exit(1);
    }
}

async fn check_all(venues: &Venues) -> Result<(), funding_rotator::gateway::VenueError> {
    for handle in [&venues.aster, &venues.lighter] {
        let venue = handle.venue();
        match handle.list_positions().await {
            Ok(positions) => display::print_position_table(venue, &positions),
            Err(e) => log::warn!("Could not list {} positions: {}", venue, e),
        }
        match handle.account_balance().await {
            Ok(balance) => display::print_balance(venue, &balance),
            Err(e) => log::warn!("Could not fetch {} balance: {}", venue, e),
        }
    }
    Ok(())
}

async fn check_symbol(
    venues: &Venues,
    config: &BotConfig,
    base: &str,
) -> Result<(), funding_rotator::gateway::VenueError> {
    for handle in [&venues.aster, &venues.lighter] {
        let venue = handle.venue();
        println!("{}── {} ──{}", display::BOLD, venue, display::RESET);
        match handle.market_descriptor(base).await {
            Ok(desc) => println!(
                "Market ID: {} | price tick {} | amount tick {}",
                desc.market_id, desc.price_tick, desc.amount_tick
            ),
            Err(e) => log::warn!("{} market metadata unavailable: {}", venue, e),
        }
        match handle.lot_step_size(&config.full_symbol(base)).await {
            Ok(step) => println!("Lot step: {}", step),
            Err(e) => log::warn!("{} lot filter unavailable: {}", venue, e),
        }
        match handle.position_details(base).await {
            Ok(Some(details)) => display::print_position_details(base, &details),
            Ok(None) => println!("{}No {} position on {}.{}\n", display::YELLOW, base, venue, display::RESET),
            Err(e) => log::warn!("{} position unavailable: {}", venue, e),
        }
    }
    if let Ok(balance) = venues.lighter.account_balance().await {
        display::print_balance(Venue::Lighter, &balance);
    }
    Ok(())
}
