// ─────────────────────────────────────────────────────────────────────────────
// scanner.rs — Opportunity Scanner
//
// Fans out funding-rate and mid-price fetches for every configured
// symbol on both venues, annualizes, and ranks the spread-gated
// delta-neutral opportunities.
// ─────────────────────────────────────────────────────────────────────────────
use std::time::Duration;

use futures_util::future::join_all;

use crate::gateway::Venue;
use crate::venues::Venues;

/// APR in percent: per-period rate annualized by the venue's funding cadence.
pub fn annualize(rate: f64, periods_per_day: f64) -> f64 {
    rate * periods_per_day * 365.0 * 100.0
}

/// Cross-venue mid spread in percent of the average mid.
pub fn spread_pct(mid_a: f64, mid_l: f64) -> f64 {
    let avg = (mid_a + mid_l) / 2.0;
    if avg <= 0.0 {
        return f64::INFINITY;
    }
    (mid_a - mid_l).abs() / avg * 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingData,
    SpreadTooWide { spread_pct: f64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingData => write!(f, "missing data"),
            SkipReason::SpreadTooWide { spread_pct } => {
                write!(f, "spread {:.3}%", spread_pct)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Opportunity {
    pub symbol: String,
    pub long_venue: Venue,
    pub short_venue: Venue,
    pub net_apr: f64,
    pub spread_pct: f64,
    pub aster_apr: f64,
    pub lighter_apr: f64,
    pub aster_mid: f64,
    pub lighter_mid: f64,
}

/// Per-symbol scan outcome.
#[derive(Debug, Clone)]
pub enum FundingObservation {
    Eligible(Opportunity),
    Ineligible { symbol: String, reason: SkipReason },
}

/// Scores one symbol from raw per-venue data. Both rates and both mids
/// must be present; the spread gate runs before direction selection.
pub fn evaluate_symbol(
    symbol: &str,
    aster_rate: Option<f64>,
    lighter_rate: Option<f64>,
    aster_mid: Option<f64>,
    lighter_mid: Option<f64>,
    max_spread_pct: f64,
) -> FundingObservation {
    let (ar, lr, am, lm) = match (aster_rate, lighter_rate, aster_mid, lighter_mid) {
        (Some(ar), Some(lr), Some(am), Some(lm)) => (ar, lr, am, lm),
        _ => {
            return FundingObservation::Ineligible {
                symbol: symbol.to_string(),
                reason: SkipReason::MissingData,
            }
        }
    };

    let spread = spread_pct(am, lm);
    if spread > max_spread_pct {
        return FundingObservation::Ineligible {
            symbol: symbol.to_string(),
            reason: SkipReason::SpreadTooWide { spread_pct: spread },
        };
    }

    let aster_apr = annualize(ar, Venue::Aster.periods_per_day());
    let lighter_apr = annualize(lr, Venue::Lighter.periods_per_day());

    // long Aster / short Lighter earns Lighter's funding and pays Aster's,
    // and vice versa; the better direction wins.
    let long_aster_short_lighter = lighter_apr - aster_apr;
    let long_lighter_short_aster = aster_apr - lighter_apr;

    let (long_venue, short_venue, net_apr) = if long_aster_short_lighter >= long_lighter_short_aster
    {
        (Venue::Aster, Venue::Lighter, long_aster_short_lighter)
    } else {
        (Venue::Lighter, Venue::Aster, long_lighter_short_aster)
    };

    FundingObservation::Eligible(Opportunity {
        symbol: symbol.to_string(),
        long_venue,
        short_venue,
        net_apr,
        spread_pct: spread,
        aster_apr,
        lighter_apr,
        aster_mid: am,
        lighter_mid: lm,
    })
}

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Sorted by net APR descending.
    pub eligible: Vec<Opportunity>,
    pub ineligible: Vec<(String, SkipReason)>,
}

impl ScanReport {
    /// First eligible opportunity clearing the APR threshold, if any.
    pub fn best(&self, min_net_apr: f64) -> Option<&Opportunity> {
        self.eligible.iter().find(|o| o.net_apr >= min_net_apr)
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub max_spread_pct: f64,
    pub stagger_delay: Duration,
    pub symbol_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_spread_pct: 0.15,
            stagger_delay: Duration::from_millis(2_500),
            symbol_timeout: Duration::from_secs(30),
        }
    }
}

pub struct FundingScanner {
    config: ScannerConfig,
}

impl FundingScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// One full scan pass. Symbol tasks start `stagger_delay` apart to
    /// smooth the burst; each task fans out four governed fetches and is
    /// bounded by `symbol_timeout`. Per-symbol failures never abort the
    /// pass; they degrade to `MissingData`.
    pub async fn scan(&self, venues: &Venues, symbols: &[String]) -> ScanReport {
        let mut tasks = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            let venues = venues.clone();
            let symbol = symbol.clone();
            let delay = self.config.stagger_delay.mul_f64(i as f64);
            let timeout = self.config.symbol_timeout;
            let max_spread = self.config.max_spread_pct;
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match tokio::time::timeout(timeout, fetch_symbol(&venues, &symbol, max_spread))
                    .await
                {
                    Ok(obs) => obs,
                    Err(_) => {
                        log::warn!("[SCAN] {} timed out after {:?}", symbol, timeout);
                        FundingObservation::Ineligible {
                            symbol,
                            reason: SkipReason::MissingData,
                        }
                    }
                }
            }));
        }

        let mut report = ScanReport::default();
        for joined in join_all(tasks).await {
            match joined {
                Ok(FundingObservation::Eligible(opp)) => report.eligible.push(opp),
                Ok(FundingObservation::Ineligible { symbol, reason }) => {
                    report.ineligible.push((symbol, reason))
                }
                Err(e) => log::error!("[SCAN] symbol task panicked: {}", e),
            }
        }
        report
            .eligible
            .sort_by(|a, b| b.net_apr.partial_cmp(&a.net_apr).unwrap_or(std::cmp::Ordering::Equal));
        report
    }
}

async fn fetch_symbol(venues: &Venues, symbol: &str, max_spread_pct: f64) -> FundingObservation {
    let (aster_rate, lighter_rate, aster_quote, lighter_quote) = tokio::join!(
        venues.aster.funding_rate(symbol),
        venues.lighter.funding_rate(symbol),
        venues.aster.best_bid_ask(symbol),
        venues.lighter.best_bid_ask(symbol),
    );

    let aster_rate = log_missing(symbol, Venue::Aster, "funding", aster_rate);
    let lighter_rate = log_missing(symbol, Venue::Lighter, "funding", lighter_rate);
    let aster_mid = log_missing(symbol, Venue::Aster, "quote", aster_quote).and_then(|q| q.mid());
    let lighter_mid =
        log_missing(symbol, Venue::Lighter, "quote", lighter_quote).and_then(|q| q.mid());

    evaluate_symbol(symbol, aster_rate, lighter_rate, aster_mid, lighter_mid, max_spread_pct)
}

fn log_missing<T>(
    symbol: &str,
    venue: Venue,
    what: &str,
    res: Result<T, crate::gateway::VenueError>,
) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("[SCAN] {} {} {} unavailable: {}", venue, symbol, what, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_apr_is_absolute_rate_gap() {
        // with all data present, net_apr == |apr_A - apr_L| and the
        // direction is the one with the positive difference
        let obs = evaluate_symbol("BTC", Some(0.0002), Some(0.0001), Some(50_000.0), Some(50_010.0), 0.15);
        match obs {
            FundingObservation::Eligible(o) => {
                assert!((o.net_apr - (o.aster_apr - o.lighter_apr).abs()).abs() < 1e-9);
                assert_eq!(o.long_venue, Venue::Lighter);
                assert_eq!(o.short_venue, Venue::Aster);
            }
            other => panic!("expected eligible, got {:?}", other),
        }
    }

    #[test]
    fn picks_long_lighter_when_aster_pays_more() {
        // apr_A = 40%, apr_L = 10% -> long Lighter, short Aster,
        // net 30%. Back the APRs into per-period rates.
        let aster_rate = 40.0 / (6.0 * 365.0 * 100.0);
        let lighter_rate = 10.0 / (3.0 * 365.0 * 100.0);
        let obs = evaluate_symbol(
            "BTC",
            Some(aster_rate),
            Some(lighter_rate),
            Some(50_000.0),
            Some(50_025.0), // 0.05% spread
            0.15,
        );
        match obs {
            FundingObservation::Eligible(o) => {
                assert_eq!(o.long_venue, Venue::Lighter);
                assert_eq!(o.short_venue, Venue::Aster);
                assert!((o.net_apr - 30.0).abs() < 1e-6);
                assert!(o.spread_pct < 0.06);
            }
            other => panic!("expected eligible, got {:?}", other),
        }
    }

    #[test]
    fn wide_spread_is_rejected() {
        // 0.30% spread against a 0.15% cap
        let obs = evaluate_symbol(
            "ETH",
            Some(0.0001),
            Some(0.0002),
            Some(3_000.0),
            Some(3_009.0),
            0.15,
        );
        match obs {
            FundingObservation::Ineligible { symbol, reason } => {
                assert_eq!(symbol, "ETH");
                assert!(matches!(reason, SkipReason::SpreadTooWide { .. }));
            }
            other => panic!("expected ineligible, got {:?}", other),
        }
    }

    #[test]
    fn missing_rate_or_mid_skips_symbol() {
        for obs in [
            evaluate_symbol("SOL", None, Some(0.0001), Some(150.0), Some(150.0), 0.15),
            evaluate_symbol("SOL", Some(0.0001), None, Some(150.0), Some(150.0), 0.15),
            evaluate_symbol("SOL", Some(0.0001), Some(0.0001), None, Some(150.0), 0.15),
            evaluate_symbol("SOL", Some(0.0001), Some(0.0001), Some(150.0), None, 0.15),
        ] {
            match obs {
                FundingObservation::Ineligible { reason, .. } => {
                    assert_eq!(reason, SkipReason::MissingData)
                }
                other => panic!("expected missing data, got {:?}", other),
            }
        }
    }

    #[test]
    fn annualization_matches_contract() {
        // rate × periods_per_day × 365 × 100
        assert!((annualize(0.0001, 6.0) - 21.9).abs() < 1e-9);
        assert!((annualize(0.0001, 3.0) - 10.95).abs() < 1e-9);
    }

    #[test]
    fn report_best_respects_threshold() {
        let mk = |sym: &str, apr: f64| Opportunity {
            symbol: sym.to_string(),
            long_venue: Venue::Aster,
            short_venue: Venue::Lighter,
            net_apr: apr,
            spread_pct: 0.01,
            aster_apr: 0.0,
            lighter_apr: 0.0,
            aster_mid: 1.0,
            lighter_mid: 1.0,
        };
        let report = ScanReport {
            eligible: vec![mk("BTC", 12.0), mk("ETH", 4.0)],
            ineligible: vec![],
        };
        assert_eq!(report.best(5.0).map(|o| o.symbol.as_str()), Some("BTC"));
        assert!(report.best(20.0).is_none());
    }
}
