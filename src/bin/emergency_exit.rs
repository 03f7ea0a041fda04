// Emergency exit: finds every delta-neutral pair live on the two
// venues, shows per-leg PnL, and closes all legs after an explicit
// operator confirmation.
use std::io::{BufRead, Write};
use std::time::Duration;

use funding_rotator::config::BotConfig;
use funding_rotator::display;
use funding_rotator::gateway::{OpenPosition, Side, VenueError};
use funding_rotator::logging::init_logging;
use funding_rotator::{build_venues, venues::Venues};

struct MatchedPair {
    symbol: String,
    aster: OpenPosition,
    lighter: OpenPosition,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging("emergency-exit");

    display::print_header("EMERGENCY EXIT — DELTA-NEUTRAL POSITION CLOSER");
    let config = BotConfig::load("config.json");
    let venues = build_venues(&config);

    if let Err(e) = run(&venues).await {
        log::error!("Emergency exit failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(venues: &Venues) -> Result<(), VenueError> {
    println!("{}Scanning for positions on both venues…{}\n", display::CYAN, display::RESET);
    let (aster_positions, lighter_positions) =
        tokio::try_join!(venues.aster.list_positions(), venues.lighter.list_positions())?;
    println!("  Aster:   {} position(s)", aster_positions.len());
    println!("  Lighter: {} position(s)\n", lighter_positions.len());

    let pairs = match_pairs(&aster_positions, &lighter_positions);
    if pairs.is_empty() {
        println!("{}No delta-neutral pairs found. Nothing to do.{}\n", display::YELLOW, display::RESET);
        return Ok(());
    }

    println!("{}Delta-neutral pairs found:{}\n", display::BOLD, display::RESET);
    println!(
        "{:<12} {:<10} {:<8} {:>14} {:>14} {:>16}",
        "Symbol", "Venue", "Side", "Size", "Entry Price", "Unrealized PnL"
    );
    println!("{}", "-".repeat(100));
    let mut total_pnl = 0.0;
    for pair in &pairs {
        total_pnl += display::print_pair(&pair.symbol, &pair.aster, &pair.lighter);
    }
    println!(
        "\n{}Total unrealized PnL: {}{:.4}{}\n",
        display::BOLD,
        if total_pnl >= 0.0 { display::GREEN } else { display::RED },
        total_pnl,
        display::RESET
    );

    println!(
        "{}{}WARNING: this will close ALL pairs shown above. This cannot be undone.{}",
        display::BOLD,
        display::RED,
        display::RESET
    );
    if !confirm("Press ENTER to close, or type anything else to abort: ") {
        println!("\n{}Aborted; nothing was closed.{}\n", display::YELLOW, display::RESET);
        return Ok(());
    }

    for pair in &pairs {
        close_pair(venues, pair).await;
    }

    // give the IOC orders a moment before checking what remains
    tokio::time::sleep(Duration::from_secs(3)).await;
    println!("\n{}Verifying closure…{}\n", display::CYAN, display::RESET);
    for pair in &pairs {
        let (aster_left, lighter_left) = tokio::join!(
            venues.aster.open_size(&pair.symbol),
            venues.lighter.open_size(&pair.symbol),
        );
        let aster_left = aster_left.unwrap_or(f64::NAN);
        let lighter_left = lighter_left.unwrap_or(f64::NAN);
        if aster_left.abs() < 1e-9 && lighter_left.abs() < 1e-9 {
            println!("  {}✓ {}: fully closed on both venues{}", display::GREEN, pair.symbol, display::RESET);
        } else {
            println!(
                "  {}⚠ {}: residual Aster {:+.6}, Lighter {:+.6}{}",
                display::YELLOW,
                pair.symbol,
                aster_left,
                lighter_left,
                display::RESET
            );
        }
    }
    println!("\n{}Emergency exit complete.{}\n", display::GREEN, display::RESET);
    Ok(())
}

/// Pairs up same-symbol positions with opposite signs.
fn match_pairs(aster: &[OpenPosition], lighter: &[OpenPosition]) -> Vec<MatchedPair> {
    let mut pairs = Vec::new();
    for a in aster {
        if let Some(l) = lighter.iter().find(|l| l.symbol == a.symbol) {
            if a.size * l.size < 0.0 {
                pairs.push(MatchedPair {
                    symbol: a.symbol.clone(),
                    aster: a.clone(),
                    lighter: l.clone(),
                });
            }
        }
    }
    pairs
}

async fn close_pair(venues: &Venues, pair: &MatchedPair) {
    println!("Closing {}…", pair.symbol);
    let aster_side = if pair.aster.size > 0.0 { Side::Sell } else { Side::Buy };
    let lighter_side = if pair.lighter.size > 0.0 { Side::Sell } else { Side::Buy };

    let (aster_res, lighter_res) = tokio::join!(
        venues
            .aster
            .close_position(&pair.symbol, pair.aster.size.abs(), aster_side),
        venues
            .lighter
            .close_position(&pair.symbol, pair.lighter.size.abs(), lighter_side),
    );
    for (label, res) in [("Aster", aster_res), ("Lighter", lighter_res)] {
        match res {
            Ok(_) => println!("  {}✓ {} close order sent{}", display::GREEN, label, display::RESET),
            Err(e) => println!("  {}✗ {} close failed: {}{}", display::RED, label, e, display::RESET),
        }
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{}{}{}", display::BOLD, prompt, display::RESET);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => line.trim().is_empty(),
        Err(_) => false,
    }
}
