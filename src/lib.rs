// ─────────────────────────────────────────────────────────────────────────────
// funding-rotator: cross-venue delta-neutral funding rotation engine
//
// Continuously ranks perp funding opportunities across Aster and
// Lighter, opens the best matched long/short pair, holds it to collect
// funding, closes, and repeats. The same gateways power the
// check-positions inspector and the emergency-exit closer.
// ─────────────────────────────────────────────────────────────────────────────
pub mod aster;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod governor;
pub mod lighter;
pub mod logging;
pub mod monitor;
pub mod recovery;
pub mod scanner;
pub mod sim;
pub mod state;
pub mod venues;

use std::sync::Arc;

use crate::aster::AsterGateway;
use crate::config::BotConfig;
use crate::gateway::Venue;
use crate::governor::{BackoffConfig, RateGovernor};
use crate::lighter::LighterGateway;
use crate::venues::{VenueHandle, Venues};

/// Builds both governed live gateways from environment credentials.
pub fn build_venues(config: &BotConfig) -> Venues {
    let (aster_creds, lighter_creds) = config::load_credentials();
    let cap = config.max_concurrent_requests_per_venue;

    Venues {
        aster: VenueHandle::new(
            Arc::new(AsterGateway::new(aster_creds, &config.quote)),
            Arc::new(RateGovernor::new(Venue::Aster, cap, BackoffConfig::default())),
        ),
        lighter: VenueHandle::new(
            Arc::new(LighterGateway::new(lighter_creds)),
            Arc::new(RateGovernor::new(Venue::Lighter, cap, BackoffConfig::default())),
        ),
    }
}
