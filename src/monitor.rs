// ─────────────────────────────────────────────────────────────────────────────
// monitor.rs — Position Monitor
//
// While HOLDING: polls both venues' unrealized PnL, watches the hold
// timer, and evaluates the stop-loss against 75% of the cross-margin
// liquidation threshold.
// ─────────────────────────────────────────────────────────────────────────────
use chrono::{DateTime, Utc};

use crate::gateway::Venue;
use crate::state::Position;
use crate::venues::Venues;

/// Stop-loss trip level in percent of notional: 75% of the ~(100/lev)%
/// adverse move that would liquidate a cross-margin position.
pub fn stop_loss_threshold_pct(leverage: u32) -> f64 {
    (100.0 / leverage.max(1) as f64) * 0.75
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseSignal {
    HoldTimerExpired,
    StopLoss { worst_venue: Venue, pnl_pct: f64 },
}

#[derive(Debug, Clone)]
pub struct HealthSample {
    pub aster_pnl: Option<f64>,
    pub lighter_pnl: Option<f64>,
    pub worst_venue: Option<Venue>,
    pub worst_pnl: f64,
    pub pnl_pct: f64,
    pub seconds_remaining: i64,
}

/// Fetches per-leg unrealized PnL, best effort. A leg that cannot be
/// read is logged and treated as absent, never fatal.
pub async fn sample_health(venues: &Venues, position: &Position, now: DateTime<Utc>) -> HealthSample {
    let symbol = position.symbol.as_str();
    let (details_a, details_l) = tokio::join!(
        venues.aster.position_details(symbol),
        venues.lighter.position_details(symbol),
    );

    let aster_pnl = match details_a {
        Ok(d) => d.map(|p| p.unrealized_pnl),
        Err(e) => {
            log::warn!("[MONITOR] Aster PnL unavailable for {}: {}", symbol, e);
            None
        }
    };
    let lighter_pnl = match details_l {
        Ok(d) => d.map(|p| p.unrealized_pnl),
        Err(e) => {
            log::warn!("[MONITOR] Lighter PnL unavailable for {}: {}", symbol, e);
            None
        }
    };

    build_sample(position, aster_pnl, lighter_pnl, now)
}

/// Pure assembly of a health sample from raw per-leg PnL readings.
pub fn build_sample(
    position: &Position,
    aster_pnl: Option<f64>,
    lighter_pnl: Option<f64>,
    now: DateTime<Utc>,
) -> HealthSample {
    let (worst_venue, worst_pnl) = match (aster_pnl, lighter_pnl) {
        (Some(a), Some(l)) => {
            if a <= l {
                (Some(Venue::Aster), a)
            } else {
                (Some(Venue::Lighter), l)
            }
        }
        (Some(a), None) => (Some(Venue::Aster), a),
        (None, Some(l)) => (Some(Venue::Lighter), l),
        (None, None) => (None, 0.0),
    };

    let notional = position.size_base * position.avg_mid;
    let pnl_pct = if notional > 0.0 { worst_pnl / notional * 100.0 } else { 0.0 };

    HealthSample {
        aster_pnl,
        lighter_pnl,
        worst_venue,
        worst_pnl,
        pnl_pct,
        seconds_remaining: (position.target_close_at - now).num_seconds(),
    }
}

/// Decides whether the pair must close now. Timer expiry wins over the
/// stop-loss so a position is never recorded as stopped out after a
/// full hold.
pub fn evaluate(sample: &HealthSample, leverage: u32, enable_stop_loss: bool) -> Option<CloseSignal> {
    if sample.seconds_remaining <= 0 {
        return Some(CloseSignal::HoldTimerExpired);
    }
    if enable_stop_loss && sample.pnl_pct.abs() >= stop_loss_threshold_pct(leverage) {
        if let Some(worst_venue) = sample.worst_venue {
            return Some(CloseSignal::StopLoss { worst_venue, pnl_pct: sample.pnl_pct });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position() -> Position {
        Position {
            symbol: "BTC".to_string(),
            long_venue: Venue::Lighter,
            short_venue: Venue::Aster,
            leverage: 3,
            opened_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            target_close_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            size_base: 0.002,
            avg_mid: 50_000.0,
            expected_net_apr: 30.0,
            last_table_refresh: None,
        }
    }

    fn mid_hold() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap()
    }

    #[test]
    fn threshold_is_three_quarters_of_liquidation() {
        assert_eq!(stop_loss_threshold_pct(3), 25.0);
        assert_eq!(stop_loss_threshold_pct(4), 18.75);
        assert_eq!(stop_loss_threshold_pct(1), 75.0);
    }

    #[test]
    fn stop_loss_fires_exactly_at_threshold() {
        // Fires iff |worst_pnl| / notional × 100 >= (100/lev) × 0.75.
        let pos = position();
        let notional = pos.size_base * pos.avg_mid; // $100
        let at = build_sample(&pos, Some(-25.0 / 100.0 * notional), Some(1.0), mid_hold());
        assert!(matches!(
            evaluate(&at, pos.leverage, true),
            Some(CloseSignal::StopLoss { worst_venue: Venue::Aster, .. })
        ));

        let under = build_sample(&pos, Some(-24.9 / 100.0 * notional), Some(1.0), mid_hold());
        assert_eq!(evaluate(&under, pos.leverage, true), None);
    }

    #[test]
    fn leveraged_trip_selects_worst_exchange() {
        // Leverage 3 (threshold 25%), worst leg at -26% on Aster ->
        // stop-loss close attributed to Aster.
        let pos = position();
        let sample = build_sample(&pos, Some(-26.0), Some(0.5), mid_hold());
        match evaluate(&sample, pos.leverage, true) {
            Some(CloseSignal::StopLoss { worst_venue, pnl_pct }) => {
                assert_eq!(worst_venue, Venue::Aster);
                assert!((pnl_pct - (-26.0)).abs() < 1e-9);
            }
            other => panic!("expected stop-loss, got {:?}", other),
        }
    }

    #[test]
    fn disabled_stop_loss_never_fires() {
        let pos = position();
        let sample = build_sample(&pos, Some(-90.0), Some(0.0), mid_hold());
        assert_eq!(evaluate(&sample, pos.leverage, false), None);
    }

    #[test]
    fn missing_leg_uses_the_other() {
        let pos = position();
        let sample = build_sample(&pos, None, Some(-3.0), mid_hold());
        assert_eq!(sample.worst_venue, Some(Venue::Lighter));
        assert_eq!(sample.worst_pnl, -3.0);

        let none = build_sample(&pos, None, None, mid_hold());
        assert_eq!(none.worst_venue, None);
        assert_eq!(evaluate(&none, pos.leverage, true), None);
    }

    #[test]
    fn expiry_beats_stop_loss() {
        let pos = position();
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 1).unwrap();
        let sample = build_sample(&pos, Some(-50.0), Some(0.0), after);
        assert_eq!(evaluate(&sample, pos.leverage, true), Some(CloseSignal::HoldTimerExpired));
    }
}
