// End-to-end component tests against the in-memory venues: pair
// open/close symmetry, partial-fill surfacing, scanner ranking, and
// crash-restart recovery.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use funding_rotator::config::BotConfig;
use funding_rotator::coordinator::TradeCoordinator;
use funding_rotator::error::EngineError;
use funding_rotator::gateway::{Venue, VenueError};
use funding_rotator::governor::{BackoffConfig, RateGovernor};
use funding_rotator::recovery;
use funding_rotator::scanner::{FundingScanner, Opportunity, ScannerConfig, SkipReason};
use funding_rotator::sim::SimVenue;
use funding_rotator::state::{BotState, Position, StatePersistor};
use funding_rotator::venues::{VenueHandle, Venues};

fn sim_venues() -> (Venues, Arc<SimVenue>, Arc<SimVenue>) {
    let aster = Arc::new(SimVenue::new(Venue::Aster));
    let lighter = Arc::new(SimVenue::new(Venue::Lighter));
    let venues = Venues {
        aster: VenueHandle::new(
            aster.clone(),
            Arc::new(RateGovernor::new(Venue::Aster, 2, BackoffConfig::default())),
        ),
        lighter: VenueHandle::new(
            lighter.clone(),
            Arc::new(RateGovernor::new(Venue::Lighter, 2, BackoffConfig::default())),
        ),
    };
    (venues, aster, lighter)
}

fn seed_btc(aster: &SimVenue, lighter: &SimVenue) {
    aster.seed_market("BTC", 0.1, 0.0001);
    lighter.seed_market("BTC", 0.1, 0.0001);
    aster.seed_quote("BTC", 49_995.0, 50_005.0);
    lighter.seed_quote("BTC", 49_990.0, 50_010.0);
}

fn btc_opportunity() -> Opportunity {
    Opportunity {
        symbol: "BTC".to_string(),
        long_venue: Venue::Lighter,
        short_venue: Venue::Aster,
        net_apr: 30.0,
        spread_pct: 0.05,
        aster_apr: 40.0,
        lighter_apr: 10.0,
        aster_mid: 50_000.0,
        lighter_mid: 50_000.0,
    }
}

fn tmp_state(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rotator_it_{}_{}.json", tag, uuid::Uuid::new_v4()))
}

// ─── Coordinator ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn open_produces_a_balanced_hedge() {
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);

    let coordinator = TradeCoordinator::new(100);
    let config = BotConfig::default();
    let position = coordinator
        .open_pair(&venues, &btc_opportunity(), &config)
        .await
        .expect("open should succeed");

    // $100 at ~50k mid floors to 0.002 on a 0.0001 grid
    assert!((position.size_base - 0.002).abs() < 1e-12);
    assert_eq!(position.long_venue, Venue::Lighter);
    assert_eq!(position.short_venue, Venue::Aster);

    // legs are equal-size and opposite-signed within one tick
    let long_size = lighter.signed_size("BTC");
    let short_size = aster.signed_size("BTC");
    assert!(long_size > 0.0 && short_size < 0.0);
    assert!((long_size.abs() - position.size_base).abs() <= 0.0001);
    assert!((long_size + short_size).abs() <= 0.0001);

    // leverage was configured on both venues
    assert_eq!(aster.leverage_for("BTC"), Some(3));
    assert_eq!(lighter.leverage_for("BTC"), Some(3));

    // hold timer honors the configured duration
    let expected_close = position.opened_at + ChronoDuration::seconds(8 * 3600);
    assert_eq!(position.target_close_at, expected_close);
}

#[tokio::test(start_paused = true)]
async fn close_flattens_both_venues() {
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);

    let coordinator = TradeCoordinator::new(100);
    let config = BotConfig::default();
    let position = coordinator
        .open_pair(&venues, &btc_opportunity(), &config)
        .await
        .unwrap();

    let report = coordinator.close_pair(&venues, &position).await.unwrap();
    assert!(report.aster_closed && report.lighter_closed);
    assert_eq!(aster.signed_size("BTC"), 0.0);
    assert_eq!(lighter.signed_size("BTC"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn close_uses_live_sizes_not_the_stored_one() {
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    // an external fill doubled the short leg behind our back
    aster.seed_position("BTC", -0.004, 50_000.0);
    lighter.seed_position("BTC", 0.002, 50_000.0);

    let position = Position {
        symbol: "BTC".to_string(),
        long_venue: Venue::Lighter,
        short_venue: Venue::Aster,
        leverage: 3,
        opened_at: Utc::now(),
        target_close_at: Utc::now(),
        size_base: 0.002,
        avg_mid: 50_000.0,
        expected_net_apr: 30.0,
        last_table_refresh: None,
    };
    let report = TradeCoordinator::new(100)
        .close_pair(&venues, &position)
        .await
        .unwrap();
    assert!(report.aster_closed && report.lighter_closed);
    assert_eq!(aster.signed_size("BTC"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn one_failed_leg_surfaces_as_partial_fill() {
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    aster.fail_next_place(VenueError::Api("margin check failed".to_string()));

    let res = TradeCoordinator::new(100)
        .open_pair(&venues, &btc_opportunity(), &BotConfig::default())
        .await;
    match res {
        Err(EngineError::PartialFill { filled, failed, .. }) => {
            assert_eq!(filled, Venue::Lighter);
            assert_eq!(failed, Venue::Aster);
        }
        other => panic!("expected PartialFill, got {:?}", other.map(|_| ())),
    }
    // the filled leg is intentionally left alone (no auto-unwind)
    assert!(lighter.signed_size("BTC") > 0.0);
    assert_eq!(aster.signed_size("BTC"), 0.0);
}

#[tokio::test(start_paused = true)]
async fn residual_size_surfaces_as_partial_close() {
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    aster.seed_position("BTC", -0.002, 50_000.0);
    lighter.seed_position("BTC", 0.002, 50_000.0);
    aster.fail_next_close(VenueError::Api("engine busy".to_string()));

    let position = Position {
        symbol: "BTC".to_string(),
        long_venue: Venue::Lighter,
        short_venue: Venue::Aster,
        leverage: 3,
        opened_at: Utc::now(),
        target_close_at: Utc::now(),
        size_base: 0.002,
        avg_mid: 50_000.0,
        expected_net_apr: 30.0,
        last_table_refresh: None,
    };
    match TradeCoordinator::new(100).close_pair(&venues, &position).await {
        Err(EngineError::PartialClose { still_open }) => {
            assert_eq!(still_open.len(), 1);
            assert_eq!(still_open[0].0, Venue::Aster);
        }
        other => panic!("expected PartialClose, got {:?}", other.map(|_| ())),
    }
    // the lighter leg did close
    assert_eq!(lighter.signed_size("BTC"), 0.0);
}

// ─── Scanner ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn scan_ranks_and_explains_skips() {
    let (venues, aster, lighter) = sim_venues();

    // BTC: strong opportunity, tight spread
    aster.seed_quote("BTC", 49_999.0, 50_001.0);
    lighter.seed_quote("BTC", 49_998.0, 50_002.0);
    aster.seed_funding("BTC", 40.0 / (6.0 * 365.0 * 100.0));
    lighter.seed_funding("BTC", 10.0 / (3.0 * 365.0 * 100.0));

    // ETH: data fine but spread blown out
    aster.seed_quote("ETH", 3_000.0, 3_000.2);
    lighter.seed_quote("ETH", 3_009.0, 3_009.2);
    aster.seed_funding("ETH", 0.0001);
    lighter.seed_funding("ETH", 0.0002);

    // SOL: funding missing on one venue
    aster.seed_quote("SOL", 150.0, 150.1);
    lighter.seed_quote("SOL", 150.0, 150.1);
    aster.seed_funding("SOL", 0.0001);

    let scanner = FundingScanner::new(ScannerConfig {
        max_spread_pct: 0.15,
        stagger_delay: Duration::from_millis(0),
        symbol_timeout: Duration::from_secs(30),
    });
    let report = scanner
        .scan(
            &venues,
            &["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
        )
        .await;

    assert_eq!(report.eligible.len(), 1);
    let best = report.best(5.0).expect("BTC should clear the bar");
    assert_eq!(best.symbol, "BTC");
    assert_eq!(best.long_venue, Venue::Lighter);
    assert!((best.net_apr - 30.0).abs() < 1e-6);

    let reasons: std::collections::HashMap<_, _> =
        report.ineligible.iter().cloned().collect();
    assert!(matches!(reasons.get("ETH"), Some(SkipReason::SpreadTooWide { .. })));
    assert!(matches!(reasons.get("SOL"), Some(SkipReason::MissingData)));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_venue_degrades_to_missing_data() {
    let (venues, aster, lighter) = sim_venues();
    aster.seed_quote("BTC", 50_000.0, 50_001.0);
    lighter.seed_quote("BTC", 50_000.0, 50_001.0);
    lighter.seed_funding("BTC", 0.0001);
    // more 429s than the governor will retry through
    aster.rate_limit_funding(10);

    let scanner = FundingScanner::new(ScannerConfig {
        max_spread_pct: 0.15,
        stagger_delay: Duration::from_millis(0),
        symbol_timeout: Duration::from_secs(120),
    });
    let report = scanner.scan(&venues, &["BTC".to_string()]).await;
    assert!(report.eligible.is_empty());
    assert_eq!(report.ineligible.len(), 1);
    assert_eq!(report.ineligible[0].1, SkipReason::MissingData);
}

// ─── Recovery ──────────────────────────────────────────────────────

fn held_position(size: f64) -> Position {
    Position {
        symbol: "BTC".to_string(),
        long_venue: Venue::Lighter,
        short_venue: Venue::Aster,
        leverage: 3,
        opened_at: Utc::now() - ChronoDuration::hours(2),
        target_close_at: Utc::now() + ChronoDuration::hours(6),
        size_base: size,
        avg_mid: 50_000.0,
        expected_net_apr: 30.0,
        last_table_refresh: None,
    }
}

async fn persistor_holding(path: &PathBuf, size: f64) -> StatePersistor {
    let mut persistor = StatePersistor::load(path, &BotConfig::default());
    persistor.open_position(held_position(size)).await.unwrap();
    StatePersistor::load(path, &BotConfig::default())
}

#[tokio::test]
async fn restart_with_live_hedge_resumes_holding() {
    let path = tmp_state("resume");
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    aster.seed_position("BTC", -0.002, 50_000.0);
    lighter.seed_position("BTC", 0.002, 50_000.0);

    let mut persistor = persistor_holding(&path, 0.002).await;
    let original_close = persistor.position().unwrap().target_close_at;
    recovery::reconcile_on_start(&mut persistor, &venues).await.unwrap();

    assert_eq!(persistor.state(), BotState::Holding);
    let pos = persistor.position().expect("position survives recovery");
    // observed average matches stored size: no overwrite, timer intact
    assert_eq!(pos.size_base, 0.002);
    assert_eq!(pos.target_close_at, original_close);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn restart_adopts_drifted_observed_size() {
    let path = tmp_state("drift");
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    aster.seed_position("BTC", -0.004, 50_000.0);
    lighter.seed_position("BTC", 0.004, 50_000.0);

    let mut persistor = persistor_holding(&path, 0.002).await;
    recovery::reconcile_on_start(&mut persistor, &venues).await.unwrap();

    assert_eq!(persistor.state(), BotState::Holding);
    assert_eq!(persistor.position().unwrap().size_base, 0.004);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn restart_clears_ghost_position() {
    let path = tmp_state("ghost");
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    // state file says HOLDING but neither venue has a leg

    let mut persistor = persistor_holding(&path, 0.002).await;
    recovery::reconcile_on_start(&mut persistor, &venues).await.unwrap();

    assert_eq!(persistor.state(), BotState::Idle);
    assert!(persistor.position().is_none());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn restart_clears_one_sided_position() {
    let path = tmp_state("onesided");
    let (venues, aster, lighter) = sim_venues();
    seed_btc(&aster, &lighter);
    lighter.seed_position("BTC", 0.002, 50_000.0);

    let mut persistor = persistor_holding(&path, 0.002).await;
    recovery::reconcile_on_start(&mut persistor, &venues).await.unwrap();

    assert_eq!(persistor.state(), BotState::Idle);
    assert!(persistor.position().is_none());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn restart_resets_stale_transient_state() {
    // a crash anywhere outside IDLE with no position resets to IDLE,
    // including WAITING (killed mid-cooldown)
    for stale in [BotState::Analyzing, BotState::Opening, BotState::Waiting] {
        let path = tmp_state("stale");
        let (venues, _aster, _lighter) = sim_venues();

        let mut persistor = StatePersistor::load(&path, &BotConfig::default());
        persistor.set_state(stale).await.unwrap();

        let mut reloaded = StatePersistor::load(&path, &BotConfig::default());
        recovery::reconcile_on_start(&mut reloaded, &venues).await.unwrap();
        assert_eq!(reloaded.state(), BotState::Idle, "stale {} did not reset", stale);
        let _ = std::fs::remove_file(&path);
    }
}
