// ─────────────────────────────────────────────────────────────────────────────
// coordinator.rs — Trade Coordinator
//
// Opens and closes the delta-neutral pair: shared size computation on
// the coarser tick grid, concurrent two-leg submission, settle-and-
// verify. A one-leg failure surfaces as PartialFill/PartialClose and is
// never auto-unwound; the operator reconciles with emergency-exit.
// ─────────────────────────────────────────────────────────────────────────────
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::config::BotConfig;
use crate::error::EngineError;
use crate::gateway::{floor_to_tick, MarketDescriptor, Side, Venue};
use crate::scanner::Opportunity;
use crate::state::Position;
use crate::venues::Venues;

/// Settle window between order dispatch and position verification.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Sizes below 10 ticks are dust the venues may reject or round away.
const MIN_TICK_MULTIPLE: f64 = 10.0;

/// Shared trade size for both legs: the notional at the average mid,
/// floored to the coarser of the two amount ticks. When flooring to
/// each venue's own grid would desynchronize the legs by more than the
/// finer tick, the smaller leg is re-floored to the coarse grid.
pub fn compute_pair_size(
    notional_quote: f64,
    avg_mid: f64,
    tick_a: f64,
    tick_l: f64,
) -> Result<f64, EngineError> {
    let coarse = tick_a.max(tick_l);
    let fine = tick_a.min(tick_l);

    let mut size = floor_to_tick(notional_quote / avg_mid, coarse);

    let on_a = floor_to_tick(size, tick_a);
    let on_l = floor_to_tick(size, tick_l);
    if (on_a - on_l).abs() > fine {
        size = floor_to_tick(on_a.min(on_l), coarse);
    }

    let min_required = MIN_TICK_MULTIPLE * coarse;
    if size <= 0.0 || size < min_required {
        return Err(EngineError::SizeTooSmall { size, min_required });
    }
    Ok(size)
}

#[derive(Debug, Clone)]
pub struct PairCloseReport {
    pub aster_closed: bool,
    pub lighter_closed: bool,
    pub residual_aster: f64,
    pub residual_lighter: f64,
}

pub struct TradeCoordinator {
    cross_ticks: u32,
}

impl TradeCoordinator {
    pub fn new(cross_ticks: u32) -> Self {
        Self { cross_ticks }
    }

    /// Opens the delta-neutral pair for an opportunity. Returns the
    /// position record on success; PartialFill when exactly one leg
    /// placed (no unwind).
    pub async fn open_pair(
        &self,
        venues: &Venues,
        opp: &Opportunity,
        config: &BotConfig,
    ) -> Result<Position, EngineError> {
        let symbol = opp.symbol.as_str();

        let (desc_a, desc_l) = tokio::try_join!(
            venues.aster.market_descriptor(symbol),
            venues.lighter.market_descriptor(symbol),
        )?;
        let (quote_a, quote_l) = tokio::join!(
            venues.aster.best_bid_ask(symbol),
            venues.lighter.best_bid_ask(symbol),
        );
        let mid_a = quote_a.ok().and_then(|q| q.mid());
        let mid_l = quote_l.ok().and_then(|q| q.mid());

        let avg_mid = match (mid_a, mid_l) {
            (Some(a), Some(l)) => (a + l) / 2.0,
            (Some(a), None) => a,
            (None, Some(l)) => l,
            (None, None) => {
                return Err(EngineError::NoReferencePrice { symbol: symbol.to_string() })
            }
        };

        let size_base = compute_pair_size(
            config.notional_per_position,
            avg_mid,
            desc_a.amount_tick,
            desc_l.amount_tick,
        )?;
        log::info!(
            "[OPEN] {} size={:.6} @ avg mid {:.4} (ticks {} / {})",
            symbol,
            size_base,
            avg_mid,
            desc_a.amount_tick,
            desc_l.amount_tick
        );

        // leverage mismatches only affect margin usage; never fatal
        let (lev_a, lev_l) = tokio::join!(
            venues.aster.set_leverage(symbol, config.leverage, crate::gateway::MarginMode::Cross),
            venues.lighter.set_leverage(symbol, config.leverage, crate::gateway::MarginMode::Cross),
        );
        for (venue, res) in [(Venue::Aster, lev_a), (Venue::Lighter, lev_l)] {
            if let Err(e) = res {
                log::warn!("[OPEN] {} leverage {}x not applied: {}", venue, config.leverage, e);
            }
        }

        let long_venue = opp.long_venue;
        let short_venue = opp.short_venue;
        let long_ref = reference_mid(long_venue, mid_a, mid_l, avg_mid);
        let short_ref = reference_mid(short_venue, mid_a, mid_l, avg_mid);

        log::info!(
            "[OPEN] {} submitting legs: long {} / short {} (cross {} ticks)",
            symbol,
            long_venue,
            short_venue,
            self.cross_ticks
        );
        let (long_res, short_res) = tokio::join!(
            venues
                .get(long_venue)
                .place_order(symbol, Side::Buy, size_base, long_ref, self.cross_ticks),
            venues
                .get(short_venue)
                .place_order(symbol, Side::Sell, size_base, short_ref, self.cross_ticks),
        );

        match (long_res, short_res) {
            (Ok(l), Ok(s)) => {
                log::info!(
                    "[OPEN] {} legs accepted: long id={} short id={}",
                    symbol,
                    l.order_id,
                    s.order_id
                );
            }
            (Ok(_), Err(e)) => {
                log::error!("[OPEN] {} short leg on {} FAILED: {}", symbol, short_venue, e);
                return Err(EngineError::PartialFill {
                    filled: long_venue,
                    failed: short_venue,
                    source: e,
                });
            }
            (Err(e), Ok(_)) => {
                log::error!("[OPEN] {} long leg on {} FAILED: {}", symbol, long_venue, e);
                return Err(EngineError::PartialFill {
                    filled: short_venue,
                    failed: long_venue,
                    source: e,
                });
            }
            (Err(e_long), Err(e_short)) => {
                log::error!(
                    "[OPEN] {} both legs failed: long: {} / short: {}",
                    symbol,
                    e_long,
                    e_short
                );
                return Err(EngineError::Venue(e_long));
            }
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        let (size_a, size_l) = tokio::join!(
            venues.aster.open_size(symbol),
            venues.lighter.open_size(symbol),
        );
        match (&size_a, &size_l) {
            (Ok(a), Ok(l)) => {
                log::info!("[OPEN] {} verified: Aster {:+.6}, Lighter {:+.6}", symbol, a, l)
            }
            _ => log::warn!(
                "[OPEN] {} verification incomplete: Aster {:?}, Lighter {:?}",
                symbol,
                size_a,
                size_l
            ),
        }

        let opened_at = Utc::now();
        let hold = ChronoDuration::seconds((config.hold_duration_hours * 3600.0) as i64);
        Ok(Position {
            symbol: symbol.to_string(),
            long_venue,
            short_venue,
            leverage: config.leverage,
            opened_at,
            target_close_at: opened_at + hold,
            size_base,
            avg_mid,
            expected_net_apr: opp.net_apr,
            last_table_refresh: None,
        })
    }

    /// Closes whatever actually lives on the venues for the position's
    /// symbol. The live open sizes drive the close orders, never the
    /// persisted size; outside fills or manual intervention may have
    /// changed them.
    pub async fn close_pair(
        &self,
        venues: &Venues,
        position: &Position,
    ) -> Result<PairCloseReport, EngineError> {
        let symbol = position.symbol.as_str();

        let (desc_a, desc_l) = tokio::try_join!(
            venues.aster.market_descriptor(symbol),
            venues.lighter.market_descriptor(symbol),
        )?;
        let (size_a, size_l) = tokio::try_join!(
            venues.aster.open_size(symbol),
            venues.lighter.open_size(symbol),
        )?;
        log::info!(
            "[CLOSE] {} live sizes: Aster {:+.6}, Lighter {:+.6}",
            symbol,
            size_a,
            size_l
        );

        let close_a = close_leg(venues, Venue::Aster, symbol, size_a, &desc_a);
        let close_l = close_leg(venues, Venue::Lighter, symbol, size_l, &desc_l);
        let (res_a, res_l) = tokio::join!(close_a, close_l);
        for (venue, res) in [(Venue::Aster, &res_a), (Venue::Lighter, &res_l)] {
            if let Err(e) = res {
                log::error!("[CLOSE] {} {} close order failed: {}", symbol, venue, e);
            }
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        let (after_a, after_l) = tokio::try_join!(
            venues.aster.open_size(symbol),
            venues.lighter.open_size(symbol),
        )?;

        let aster_closed = after_a.abs() <= desc_a.amount_tick;
        let lighter_closed = after_l.abs() <= desc_l.amount_tick;
        let report = PairCloseReport {
            aster_closed,
            lighter_closed,
            residual_aster: after_a,
            residual_lighter: after_l,
        };

        if aster_closed && lighter_closed {
            log::info!("[CLOSE] {} fully closed on both venues ✅", symbol);
            Ok(report)
        } else {
            let mut still_open = Vec::new();
            if !aster_closed {
                still_open.push((Venue::Aster, after_a));
            }
            if !lighter_closed {
                still_open.push((Venue::Lighter, after_l));
            }
            log::error!("[CLOSE] {} PARTIAL: {:?}", symbol, still_open);
            Err(EngineError::PartialClose { still_open })
        }
    }
}

fn reference_mid(venue: Venue, mid_a: Option<f64>, mid_l: Option<f64>, fallback: f64) -> f64 {
    match venue {
        Venue::Aster => mid_a.unwrap_or(fallback),
        Venue::Lighter => mid_l.unwrap_or(fallback),
    }
}

/// Submits a reduce close for one venue when its live size exceeds a
/// tick; flat legs are skipped.
async fn close_leg(
    venues: &Venues,
    venue: Venue,
    symbol: &str,
    live_size: f64,
    desc: &MarketDescriptor,
) -> Result<(), crate::gateway::VenueError> {
    if live_size.abs() <= desc.amount_tick {
        log::info!("[CLOSE] {} {} already flat", symbol, venue);
        return Ok(());
    }
    let side = if live_size > 0.0 { Side::Sell } else { Side::Buy };
    log::info!(
        "[CLOSE] {} {} closing {:+.6} via {} order",
        symbol,
        venue,
        live_size,
        side.as_str()
    );
    venues
        .get(venue)
        .close_position(symbol, live_size.abs(), side)
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_lands_on_coarse_grid() {
        // $100 notional at a 50k mid floors to 0.002 on a 0.0001 grid.
        let size = compute_pair_size(100.0, 50_000.0, 0.0001, 0.0001).unwrap();
        assert_eq!(size, 0.002);
    }

    #[test]
    fn size_is_multiple_of_coarser_tick() {
        // size mod max(tick_a, tick_l) == 0 and clears the 10-tick floor.
        let size = compute_pair_size(2_500.0, 3_000.0, 0.01, 0.001).unwrap();
        let steps = size / 0.01;
        assert!((steps - steps.round()).abs() < 1e-9, "size {} off-grid", size);
        assert!(size >= 10.0 * 0.01);
    }

    #[test]
    fn dust_sizes_are_rejected() {
        // $100 of BTC with a 0.01 amount tick is 0.002 -> under 10 ticks.
        match compute_pair_size(100.0, 50_000.0, 0.01, 0.001) {
            Err(EngineError::SizeTooSmall { .. }) => {}
            other => panic!("expected SizeTooSmall, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn zero_size_is_rejected() {
        match compute_pair_size(0.5, 50_000.0, 0.001, 0.001) {
            Err(EngineError::SizeTooSmall { .. }) => {}
            other => panic!("expected SizeTooSmall, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn desynchronized_grids_refloor() {
        // Non-nested ticks (0.003 vs 0.002): both venues must end up
        // within the finer tick of each other.
        let size = compute_pair_size(100.0, 1_000.0, 0.003, 0.002).unwrap();
        let on_a = floor_to_tick(size, 0.003);
        let on_l = floor_to_tick(size, 0.002);
        assert!((on_a - on_l).abs() <= 0.002 + 1e-12);
    }
}
