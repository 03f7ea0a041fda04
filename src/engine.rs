// ─────────────────────────────────────────────────────────────────────────────
// engine.rs — Supervisor Loop
//
// Single-threaded cooperative driver of the rotation state machine:
// IDLE → ANALYZING → OPENING → HOLDING → CLOSING → WAITING → IDLE,
// with ERROR backoff and signal-driven SHUTDOWN. All venue fan-out
// happens inside the awaited component calls; state mutation and
// persistence stay on this one logical thread.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::BotConfig;
use crate::coordinator::TradeCoordinator;
use crate::display;
use crate::error::EngineError;
use crate::monitor::{self, CloseSignal};
use crate::recovery;
use crate::scanner::{FundingScanner, Opportunity, ScannerConfig};
use crate::state::{BotState, CapitalStatus, CycleRecord, CycleStatus, StatePersistor};
use crate::venues::Venues;

/// Minimum pause after an ERROR before the next attempt.
const ERROR_BACKOFF: Duration = Duration::from_secs(5 * 60);

pub struct RotationEngine {
    config: BotConfig,
    venues: Venues,
    scanner: FundingScanner,
    coordinator: TradeCoordinator,
    persistor: StatePersistor,
    shutdown: Arc<AtomicBool>,
    // in-flight cycle context, never persisted
    pending_open: Option<Opportunity>,
    close_trigger: Option<CloseSignal>,
}

impl RotationEngine {
    pub fn new(
        config: BotConfig,
        venues: Venues,
        persistor: StatePersistor,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let scanner = FundingScanner::new(ScannerConfig {
            max_spread_pct: config.max_spread_pct,
            stagger_delay: Duration::from_secs_f64(config.scan_stagger_seconds),
            symbol_timeout: Duration::from_secs(30),
        });
        let coordinator = TradeCoordinator::new(config.cross_ticks);
        Self {
            config,
            venues,
            scanner,
            coordinator,
            persistor,
            shutdown,
            pending_open: None,
            close_trigger: None,
        }
    }

    pub async fn run(&mut self) -> Result<(), EngineError> {
        recovery::reconcile_on_start(&mut self.persistor, &self.venues).await?;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                log::info!("Shutdown signal received; leaving any open position untouched.");
                self.persistor.set_state(BotState::Shutdown).await?;
                return Ok(());
            }

            match self.persistor.state() {
                BotState::Idle => self.persistor.set_state(BotState::Analyzing).await?,
                BotState::Analyzing => self.handle_analyzing().await?,
                BotState::Opening => self.handle_opening().await?,
                BotState::Holding => self.handle_holding().await?,
                BotState::Closing => self.handle_closing().await?,
                BotState::Waiting => {
                    let cooldown =
                        Duration::from_secs_f64(self.config.wait_between_cycles_minutes * 60.0);
                    log::info!("[WAIT] cooling down {:.1} minutes before next scan", cooldown.as_secs_f64() / 60.0);
                    self.sleep_interruptible(cooldown).await;
                    if !self.shutdown.load(Ordering::SeqCst) {
                        self.persistor.set_state(BotState::Idle).await?;
                    }
                }
                BotState::Error => {
                    log::warn!("[ERROR] backing off {:.0} minutes", ERROR_BACKOFF.as_secs_f64() / 60.0);
                    self.sleep_interruptible(ERROR_BACKOFF).await;
                    if !self.shutdown.load(Ordering::SeqCst) {
                        self.persistor.set_state(BotState::Idle).await?;
                    }
                }
                BotState::Shutdown => return Ok(()),
            }
        }
    }

    /// Records a fatal error into cumulative stats before the process
    /// exits non-zero. Best effort: a failing disk cannot mask the
    /// original error.
    pub async fn record_fatal(&mut self, message: &str) {
        if let Err(e) = self.persistor.record_error(message).await {
            log::error!("Failed to persist fatal error: {}", e);
        }
    }

    // ─── ANALYZING ───────────────────────────────────────────────────

    async fn handle_analyzing(&mut self) -> Result<(), EngineError> {
        self.refresh_capital_status().await?;

        log::info!(
            "[SCAN] analyzing {} symbols (stagger {:.1}s)…",
            self.config.symbols_to_monitor.len(),
            self.config.scan_stagger_seconds
        );
        let report = self
            .scanner
            .scan(&self.venues, &self.config.symbols_to_monitor)
            .await;
        display::print_funding_table(&report, self.config.min_net_apr_threshold);

        match report.best(self.config.min_net_apr_threshold) {
            Some(best) => {
                log::info!(
                    "[SCAN] candidate: {} net {:.2}% APR (long {} / short {})",
                    best.symbol,
                    best.net_apr,
                    best.long_venue,
                    best.short_venue
                );
                self.pending_open = Some(best.clone());
                self.persistor.set_state(BotState::Opening).await?;
            }
            None => {
                log::info!(
                    "[SCAN] no opportunity clears {:.1}% APR; waiting",
                    self.config.min_net_apr_threshold
                );
                self.persistor.set_state(BotState::Waiting).await?;
            }
        }
        Ok(())
    }

    /// Balance snapshot for the operator; sizing ignores it and always
    /// uses notional_per_position.
    async fn refresh_capital_status(&mut self) -> Result<(), EngineError> {
        let (aster, lighter) = tokio::join!(
            self.venues.aster.account_balance(),
            self.venues.lighter.account_balance(),
        );
        let mut capital = CapitalStatus { checked_at: Some(Utc::now()), ..Default::default() };
        match aster {
            Ok(b) => {
                capital.aster_total = Some(b.total);
                capital.aster_available = Some(b.available);
            }
            Err(e) => log::warn!("[BALANCE] Aster balance unavailable: {}", e),
        }
        match lighter {
            Ok(b) => {
                capital.lighter_total = Some(b.total);
                capital.lighter_available = Some(b.available);
            }
            Err(e) => log::warn!("[BALANCE] Lighter balance unavailable: {}", e),
        }
        self.persistor.update_capital(capital).await?;
        Ok(())
    }

    // ─── OPENING ─────────────────────────────────────────────────────

    async fn handle_opening(&mut self) -> Result<(), EngineError> {
        let opp = match self.pending_open.take() {
            Some(o) => o,
            None => {
                // restart landed us in OPENING without a candidate
                log::warn!("[OPEN] no pending candidate; rescanning");
                self.persistor.set_state(BotState::Analyzing).await?;
                return Ok(());
            }
        };

        match self.coordinator.open_pair(&self.venues, &opp, &self.config).await {
            Ok(position) => {
                self.persistor.open_position(position).await?;
            }
            Err(e) => {
                log::error!("[OPEN] {} failed: {}", opp.symbol, e);
                if let EngineError::PartialFill { filled, .. } = &e {
                    // legs were dispatched: keep the audit trail
                    let now = Utc::now();
                    self.persistor
                        .record_cycle(CycleRecord {
                            cycle_id: uuid::Uuid::new_v4().to_string(),
                            symbol: opp.symbol.clone(),
                            opened_at: now,
                            closed_at: now,
                            expected_net_apr: opp.net_apr,
                            status: CycleStatus::Failed,
                            pnl_at_close: None,
                            pnl_pct_at_close: None,
                            worst_exchange: Some(filled.label().to_string()),
                        })
                        .await?;
                }
                self.persistor.record_error(&format!("open failed: {}", e)).await?;
            }
        }
        Ok(())
    }

    // ─── HOLDING ─────────────────────────────────────────────────────

    async fn handle_holding(&mut self) -> Result<(), EngineError> {
        let mut position = match self.persistor.position().cloned() {
            Some(p) => p,
            None => {
                log::error!("[HOLD] HOLDING with no position; resetting to IDLE");
                self.persistor.set_state(BotState::Idle).await?;
                return Ok(());
            }
        };
        let check_interval = Duration::from_secs(self.config.check_interval_seconds);
        let refresh_every =
            chrono::Duration::seconds((self.config.funding_table_refresh_minutes * 60.0) as i64);

        log::info!(
            "[HOLD] monitoring {} until {} (stop-loss {})",
            position.symbol,
            position.target_close_at,
            if self.config.enable_stop_loss {
                format!("{:.1}%", monitor::stop_loss_threshold_pct(position.leverage))
            } else {
                "disabled".to_string()
            }
        );

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            let now = Utc::now();
            let sample = monitor::sample_health(&self.venues, &position, now).await;
            display::print_hold_status(&position, sample.pnl_pct, sample.seconds_remaining);

            if let Some(signal) =
                monitor::evaluate(&sample, position.leverage, self.config.enable_stop_loss)
            {
                match &signal {
                    CloseSignal::HoldTimerExpired => {
                        log::info!("[HOLD] {} hold timer expired; closing", position.symbol)
                    }
                    CloseSignal::StopLoss { worst_venue, pnl_pct } => log::warn!(
                        "🛑 [HOLD] stop-loss tripped on {} ({:+.2}%); closing {}",
                        worst_venue,
                        pnl_pct,
                        position.symbol
                    ),
                }
                self.close_trigger = Some(signal);
                self.persistor.set_state(BotState::Closing).await?;
                return Ok(());
            }

            let table_due = position
                .last_table_refresh
                .map(|t| now - t >= refresh_every)
                .unwrap_or(true);
            if table_due {
                let report = self
                    .scanner
                    .scan(&self.venues, &self.config.symbols_to_monitor)
                    .await;
                display::print_funding_table(&report, self.config.min_net_apr_threshold);
                self.persistor.touch_table_refresh().await?;
                if let Some(p) = self.persistor.position() {
                    position.last_table_refresh = p.last_table_refresh;
                }
            }

            self.sleep_interruptible(check_interval).await;
        }
    }

    // ─── CLOSING ─────────────────────────────────────────────────────

    async fn handle_closing(&mut self) -> Result<(), EngineError> {
        let position = match self.persistor.position().cloned() {
            Some(p) => p,
            None => {
                log::error!("[CLOSE] CLOSING with no position; resetting to IDLE");
                self.persistor.set_state(BotState::Idle).await?;
                return Ok(());
            }
        };
        let trigger = self.close_trigger.take().unwrap_or(CloseSignal::HoldTimerExpired);

        // capture closing PnL before the legs disappear
        let sample = monitor::sample_health(&self.venues, &position, Utc::now()).await;
        let total_pnl = match (sample.aster_pnl, sample.lighter_pnl) {
            (None, None) => None,
            (a, l) => Some(a.unwrap_or(0.0) + l.unwrap_or(0.0)),
        };

        match self.coordinator.close_pair(&self.venues, &position).await {
            Ok(_report) => {
                let (status, worst_exchange) = match &trigger {
                    CloseSignal::HoldTimerExpired => (
                        CycleStatus::Success,
                        sample.worst_venue.map(|v| v.label().to_string()),
                    ),
                    CloseSignal::StopLoss { worst_venue, .. } => {
                        (CycleStatus::StopLoss, Some(worst_venue.label().to_string()))
                    }
                };
                self.persistor
                    .record_cycle(CycleRecord {
                        cycle_id: uuid::Uuid::new_v4().to_string(),
                        symbol: position.symbol.clone(),
                        opened_at: position.opened_at,
                        closed_at: Utc::now(),
                        expected_net_apr: position.expected_net_apr,
                        status,
                        pnl_at_close: total_pnl,
                        pnl_pct_at_close: Some(sample.pnl_pct),
                        worst_exchange,
                    })
                    .await?;
                self.persistor.clear_position(BotState::Waiting).await?;
            }
            Err(e) => {
                log::error!("[CLOSE] {} failed: {}", position.symbol, e);
                self.persistor
                    .record_cycle(CycleRecord {
                        cycle_id: uuid::Uuid::new_v4().to_string(),
                        symbol: position.symbol.clone(),
                        opened_at: position.opened_at,
                        closed_at: Utc::now(),
                        expected_net_apr: position.expected_net_apr,
                        status: CycleStatus::Failed,
                        pnl_at_close: total_pnl,
                        pnl_pct_at_close: Some(sample.pnl_pct),
                        worst_exchange: sample.worst_venue.map(|v| v.label().to_string()),
                    })
                    .await?;
                // keep the position on file so startup recovery can
                // reconcile whatever is still live on the venues
                self.persistor.record_error(&format!("close failed: {}", e)).await?;
            }
        }
        Ok(())
    }

    // ─── Helpers ─────────────────────────────────────────────────────

    /// Sleeps in 1s slices so a termination signal is honored promptly.
    async fn sleep_interruptible(&self, total: Duration) {
        let deadline = tokio::time::Instant::now() + total;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let step = std::cmp::min(deadline - now, Duration::from_secs(1));
            tokio::time::sleep(step).await;
        }
    }
}
