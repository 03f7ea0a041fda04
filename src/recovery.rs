// ─────────────────────────────────────────────────────────────────────────────
// recovery.rs — Startup Reconciliation
//
// Compares the persisted position against what actually lives on the
// venues and decides resume-or-clear. Anything beyond clearing is the
// operator's job (emergency-exit).
// ─────────────────────────────────────────────────────────────────────────────
use crate::error::EngineError;
use crate::gateway::Venue;
use crate::state::{BotState, StatePersistor};
use crate::venues::Venues;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearReason {
    /// Both legs exist but point the same way; not a hedge.
    SameSigned,
    /// Exactly one leg is live; manual reconciliation required.
    OneSided(Venue),
    /// State file claims a position neither venue has.
    Ghost,
}

impl std::fmt::Display for ClearReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClearReason::SameSigned => write!(f, "both legs same-signed"),
            ClearReason::OneSided(v) => write!(f, "only the {} leg is live", v),
            ClearReason::Ghost => write!(f, "no live position on either venue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryDecision {
    /// Valid hedge found; resume HOLDING with the observed average size.
    Resume { observed_avg: f64 },
    Clear { reason: ClearReason },
}

/// Classifies the observed venue sizes against the stored hedge. A leg
/// counts as present when its observed size exceeds the venue's amount
/// tick.
pub fn classify(
    observed_aster: f64,
    observed_lighter: f64,
    tick_aster: f64,
    tick_lighter: f64,
) -> RecoveryDecision {
    let aster_live = observed_aster.abs() > tick_aster;
    let lighter_live = observed_lighter.abs() > tick_lighter;

    match (aster_live, lighter_live) {
        (true, true) => {
            if observed_aster.signum() != observed_lighter.signum() {
                RecoveryDecision::Resume {
                    observed_avg: (observed_aster.abs() + observed_lighter.abs()) / 2.0,
                }
            } else {
                RecoveryDecision::Clear { reason: ClearReason::SameSigned }
            }
        }
        (true, false) => RecoveryDecision::Clear { reason: ClearReason::OneSided(Venue::Aster) },
        (false, true) => RecoveryDecision::Clear { reason: ClearReason::OneSided(Venue::Lighter) },
        (false, false) => RecoveryDecision::Clear { reason: ClearReason::Ghost },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SizeTolerance {
    /// Relative drift in percent.
    pub pct: f64,
    /// Absolute drift in base units.
    pub abs: f64,
}

/// The stored size is only overwritten when the observed average drifts
/// past BOTH tolerance bounds; small rounding noise is kept as-is.
pub fn should_overwrite_size(stored: f64, observed: f64, tol: SizeTolerance) -> bool {
    let diff = (stored - observed).abs();
    if diff <= tol.abs {
        return false;
    }
    if stored <= 0.0 {
        return true;
    }
    diff / stored * 100.0 > tol.pct
}

/// Reconciles the persisted position against live venue state and
/// resumes or clears. Also resets stale transient states (a crash
/// mid-ANALYZING etc.) to IDLE.
pub async fn reconcile_on_start(
    persistor: &mut StatePersistor,
    venues: &Venues,
) -> Result<(), EngineError> {
    let position = match persistor.position() {
        Some(p) => p.clone(),
        None => {
            let state = persistor.state();
            if !matches!(state, BotState::Idle) {
                log::warn!("[RECOVERY] stale {} state with no position; resetting to IDLE", state);
                persistor.set_state(BotState::Idle).await?;
            }
            return Ok(());
        }
    };

    log::info!(
        "[RECOVERY] persisted position found: {} long={} short={} size={:.6}. Checking venues…",
        position.symbol,
        position.long_venue,
        position.short_venue,
        position.size_base
    );

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
        "[RECOVERY] live sizes: Aster {:+.6}, Lighter {:+.6}",
        size_a,
        size_l
    );

    match classify(size_a, size_l, desc_a.amount_tick, desc_l.amount_tick) {
        RecoveryDecision::Resume { observed_avg } => {
            let tol = SizeTolerance {
                pct: persistor.file.config.size_reconcile_tolerance_pct,
                abs: persistor.file.config.size_reconcile_tolerance_abs,
            };
            if should_overwrite_size(position.size_base, observed_avg, tol) {
                log::warn!(
                    "[RECOVERY] stored size {:.6} drifted from observed {:.6}; adopting observed",
                    position.size_base,
                    observed_avg
                );
                persistor.update_position_size(observed_avg).await?;
            }
            log::info!(
                "[RECOVERY] valid hedge on both venues; resuming HOLDING until {}",
                position.target_close_at
            );
            persistor.set_state(BotState::Holding).await?;
        }
        RecoveryDecision::Clear { reason } => {
            log::warn!(
                "[RECOVERY] {}: clearing persisted position for {} (operator reconciliation may be needed)",
                reason,
                position.symbol
            );
            persistor.clear_position(BotState::Idle).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 0.001;

    #[test]
    fn truth_table_is_exhaustive() {
        // Opposite-signed legs resume, in either orientation.
        assert_eq!(
            classify(0.002, -0.002, TICK, TICK),
            RecoveryDecision::Resume { observed_avg: 0.002 }
        );
        assert_eq!(
            classify(-0.002, 0.002, TICK, TICK),
            RecoveryDecision::Resume { observed_avg: 0.002 }
        );

        // Same-signed legs clear.
        assert_eq!(
            classify(0.002, 0.002, TICK, TICK),
            RecoveryDecision::Clear { reason: ClearReason::SameSigned }
        );
        assert_eq!(
            classify(-0.002, -0.002, TICK, TICK),
            RecoveryDecision::Clear { reason: ClearReason::SameSigned }
        );

        // One-sided legs clear and name the live venue.
        assert_eq!(
            classify(0.002, 0.0, TICK, TICK),
            RecoveryDecision::Clear { reason: ClearReason::OneSided(Venue::Aster) }
        );
        assert_eq!(
            classify(0.0, -0.002, TICK, TICK),
            RecoveryDecision::Clear { reason: ClearReason::OneSided(Venue::Lighter) }
        );

        // Ghost state clears.
        assert_eq!(
            classify(0.0, 0.0, TICK, TICK),
            RecoveryDecision::Clear { reason: ClearReason::Ghost }
        );
    }

    #[test]
    fn sub_tick_residue_counts_as_flat() {
        assert_eq!(
            classify(0.0005, -0.002, TICK, TICK),
            RecoveryDecision::Clear { reason: ClearReason::OneSided(Venue::Lighter) }
        );
    }

    #[test]
    fn uneven_legs_average() {
        match classify(0.003, -0.002, TICK, TICK) {
            RecoveryDecision::Resume { observed_avg } => {
                assert!((observed_avg - 0.0025).abs() < 1e-12)
            }
            other => panic!("expected resume, got {:?}", other),
        }
    }

    #[test]
    fn overwrite_needs_both_bounds_exceeded() {
        let tol = SizeTolerance { pct: 0.1, abs: 0.001 };
        // Large relative but tiny absolute drift: keep stored.
        assert!(!should_overwrite_size(0.002, 0.0025, tol));
        // Large absolute but tiny relative drift: keep stored.
        assert!(!should_overwrite_size(10_000.0, 10_002.0, tol));
        // Both exceeded: overwrite.
        assert!(should_overwrite_size(1.0, 1.01, tol));
    }
}
