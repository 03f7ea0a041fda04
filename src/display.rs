// ─────────────────────────────────────────────────────────────────────────────
// display.rs — operator console tables
//
// Human-facing output only; the structured log carries everything else.
// ─────────────────────────────────────────────────────────────────────────────
use crate::gateway::{AccountBalance, OpenPosition, PositionDetails, Venue};
use crate::scanner::ScanReport;
use crate::state::Position;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const RED: &str = "\x1b[91m";
pub const GREEN: &str = "\x1b[92m";
pub const YELLOW: &str = "\x1b[93m";
pub const CYAN: &str = "\x1b[96m";
pub const GRAY: &str = "\x1b[90m";

fn pnl_color(v: f64) -> &'static str {
    if v >= 0.0 {
        GREEN
    } else {
        RED
    }
}

pub fn print_header(title: &str) {
    println!("\n{}{}{}", BOLD, "═".repeat(100), RESET);
    println!("{}{:^100}{}", BOLD, title, RESET);
    println!("{}{}{}", BOLD, "═".repeat(100), RESET);
    println!(
        "{}Timestamp: {} UTC{}\n",
        GRAY,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
        RESET
    );
}

/// Ranked funding table: eligible opportunities first, skipped symbols
/// with their reasons below.
pub fn print_funding_table(report: &ScanReport, min_net_apr: f64) {
    println!(
        "\n{}{:<8} {:>10} {:>10} {:>10} {:>9} {:<20}{}",
        BOLD, "Symbol", "Aster APR", "Light APR", "Net APR", "Spread", "Direction", RESET
    );
    println!("{}", "-".repeat(100));
    for opp in &report.eligible {
        let mark = if opp.net_apr >= min_net_apr { GREEN } else { GRAY };
        println!(
            "{}{:<8} {:>9.2}% {:>9.2}% {:>9.2}% {:>8.3}% long {} / short {}{}",
            mark,
            opp.symbol,
            opp.aster_apr,
            opp.lighter_apr,
            opp.net_apr,
            opp.spread_pct,
            opp.long_venue,
            opp.short_venue,
            RESET
        );
    }
    for (symbol, reason) in &report.ineligible {
        println!("{}{:<8} skipped: {}{}", YELLOW, symbol, reason, RESET);
    }
    println!();
}

pub fn print_position_table(venue: Venue, positions: &[OpenPosition]) {
    if positions.is_empty() {
        println!("{}{}: no open positions.{}", YELLOW, venue, RESET);
        return;
    }
    println!("{}{} positions ({}):{}", GREEN, venue, positions.len(), RESET);
    println!(
        "{:<12} {:<8} {:>14} {:>14} {:>16}",
        "Symbol", "Side", "Size", "Entry Price", "Unrealized PnL"
    );
    println!("{}", "-".repeat(100));
    let mut total_pnl = 0.0;
    for pos in positions {
        let side = if pos.size > 0.0 { "LONG" } else { "SHORT" };
        total_pnl += pos.unrealized_pnl;
        println!(
            "{:<12} {}{:<8}{} {:>14.6} {:>14.4} {}{:>15.4}{}",
            pos.symbol,
            if pos.size > 0.0 { CYAN } else { YELLOW },
            side,
            RESET,
            pos.size.abs(),
            pos.entry_price,
            pnl_color(pos.unrealized_pnl),
            pos.unrealized_pnl,
            RESET
        );
    }
    println!("{}", "-".repeat(100));
    println!(
        "{}Total unrealized PnL: {}{:.4}{}\n",
        BOLD,
        pnl_color(total_pnl),
        total_pnl,
        RESET
    );
}

pub fn print_position_details(symbol: &str, details: &PositionDetails) {
    println!("\n{}Detailed position: {}{}", BOLD, symbol, RESET);
    println!("  Side:            {}", details.side);
    println!("  Size:            {:.6} (signed {:+.6})", details.size.abs(), details.size);
    println!("  Entry price:     ${:.4}", details.entry_price);
    println!(
        "  Unrealized PnL:  {}${:.4}{}",
        pnl_color(details.unrealized_pnl),
        details.unrealized_pnl,
        RESET
    );
    println!("  Leverage:        {:.2}x", details.leverage);
    println!("  Margin mode:     {}\n", details.margin_mode.as_str());
}

pub fn print_balance(venue: Venue, balance: &AccountBalance) {
    println!("{}{} balance:{}", CYAN, venue, RESET);
    println!("  Portfolio value:    ${:.2}", balance.total);
    println!("  Available balance:  ${:.2}", balance.available);
    println!("  Margin in use:      ${:.2}\n", balance.total - balance.available);
}

/// One matched delta-neutral pair for the emergency tool.
pub fn print_pair(symbol: &str, aster: &OpenPosition, lighter: &OpenPosition) -> f64 {
    for (venue, leg) in [(Venue::Aster, aster), (Venue::Lighter, lighter)] {
        let side = if leg.size > 0.0 { "LONG" } else { "SHORT" };
        println!(
            "{:<12} {:<10} {:<8} {:>14.6} {:>14.4} {}{:>15.4}{}",
            symbol,
            venue.label(),
            side,
            leg.size.abs(),
            leg.entry_price,
            pnl_color(leg.unrealized_pnl),
            leg.unrealized_pnl,
            RESET
        );
    }
    let pair_pnl = aster.unrealized_pnl + lighter.unrealized_pnl;
    println!(
        "{:<12} {}{:<10}{} {:>38} {}{:>15.4}{}",
        "", BOLD, "Pair", RESET, "", pnl_color(pair_pnl), pair_pnl, RESET
    );
    println!("{}", "-".repeat(100));
    pair_pnl
}

/// Compact HOLDING status line for the monitor loop.
pub fn print_hold_status(position: &Position, pnl_pct: f64, seconds_remaining: i64) {
    let hours = seconds_remaining.max(0) / 3600;
    let minutes = (seconds_remaining.max(0) % 3600) / 60;
    println!(
        "{}[HOLD]{} {} long {} / short {} | size {:.6} | worst leg {}{:+.2}%{} | {}h{:02}m left",
        CYAN,
        RESET,
        position.symbol,
        position.long_venue,
        position.short_venue,
        position.size_base,
        pnl_color(pnl_pct),
        pnl_pct,
        RESET,
        hours,
        minutes
    );
}
