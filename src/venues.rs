// ─────────────────────────────────────────────────────────────────────────────
// venues.rs — governed access to the two venue gateways
//
// Every venue call the engine makes goes through a VenueHandle, which
// routes it through that venue's RateGovernor with the operation-level
// timeout (30s for market data, 10s for balance).
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{
    AccountBalance, MarginMode, MarketDescriptor, OpenPosition, OrderResult, PositionDetails,
    Quote, Side, Venue, VenueError, VenueGateway,
};
use crate::governor::RateGovernor;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const BALANCE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct VenueHandle {
    pub gateway: Arc<dyn VenueGateway>,
    pub governor: Arc<RateGovernor>,
}

impl VenueHandle {
    pub fn new(gateway: Arc<dyn VenueGateway>, governor: Arc<RateGovernor>) -> Self {
        Self { gateway, governor }
    }

    pub fn venue(&self) -> Venue {
        self.gateway.venue()
    }

    pub async fn market_descriptor(&self, base: &str) -> Result<MarketDescriptor, VenueError> {
        let gw = self.gateway.clone();
        let base = base.to_string();
        self.governor
            .run_with_timeout("market_descriptor", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let base = base.clone();
                async move { gw.market_descriptor(&base).await }
            })
            .await
    }

    pub async fn best_bid_ask(&self, base: &str) -> Result<Quote, VenueError> {
        let gw = self.gateway.clone();
        let base = base.to_string();
        self.governor
            .run_with_timeout("best_bid_ask", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let base = base.clone();
                async move { gw.best_bid_ask(&base).await }
            })
            .await
    }

    pub async fn funding_rate(&self, base: &str) -> Result<f64, VenueError> {
        let gw = self.gateway.clone();
        let base = base.to_string();
        self.governor
            .run_with_timeout("funding_rate", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let base = base.clone();
                async move { gw.funding_rate(&base).await }
            })
            .await
    }

    /// Order placement is NOT retried: once dispatched an order is the
    /// venue's responsibility, and a blind resend could double-fill.
    pub async fn place_order(
        &self,
        base: &str,
        side: Side,
        size_base: f64,
        reference_price: f64,
        cross_ticks: u32,
    ) -> Result<OrderResult, VenueError> {
        self.gateway
            .place_order(base, side, size_base, reference_price, cross_ticks)
            .await
    }

    pub async fn close_position(
        &self,
        base: &str,
        size_base: f64,
        side: Side,
    ) -> Result<OrderResult, VenueError> {
        self.gateway.close_position(base, size_base, side).await
    }

    pub async fn open_size(&self, base: &str) -> Result<f64, VenueError> {
        let gw = self.gateway.clone();
        let base = base.to_string();
        self.governor
            .run_with_timeout("open_size", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let base = base.clone();
                async move { gw.open_size(&base).await }
            })
            .await
    }

    pub async fn position_details(
        &self,
        base: &str,
    ) -> Result<Option<PositionDetails>, VenueError> {
        let gw = self.gateway.clone();
        let base = base.to_string();
        self.governor
            .run_with_timeout("position_details", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let base = base.clone();
                async move { gw.position_details(&base).await }
            })
            .await
    }

    pub async fn list_positions(&self) -> Result<Vec<OpenPosition>, VenueError> {
        let gw = self.gateway.clone();
        self.governor
            .run_with_timeout("list_positions", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                async move { gw.list_positions().await }
            })
            .await
    }

    pub async fn account_balance(&self) -> Result<AccountBalance, VenueError> {
        let gw = self.gateway.clone();
        self.governor
            .run_with_timeout("account_balance", BALANCE_TIMEOUT, move || {
                let gw = gw.clone();
                async move { gw.account_balance().await }
            })
            .await
    }

    pub async fn lot_step_size(&self, full_symbol: &str) -> Result<f64, VenueError> {
        let gw = self.gateway.clone();
        let full = full_symbol.to_string();
        self.governor
            .run_with_timeout("lot_step_size", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let full = full.clone();
                async move { gw.lot_step_size(&full).await }
            })
            .await
    }

    pub async fn set_leverage(
        &self,
        base: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), VenueError> {
        let gw = self.gateway.clone();
        let base = base.to_string();
        self.governor
            .run_with_timeout("set_leverage", FETCH_TIMEOUT, move || {
                let gw = gw.clone();
                let base = base.clone();
                async move { gw.set_leverage(&base, leverage, margin_mode).await }
            })
            .await
    }
}

#[derive(Clone)]
pub struct Venues {
    pub aster: VenueHandle,
    pub lighter: VenueHandle,
}

impl Venues {
    pub fn get(&self, venue: Venue) -> &VenueHandle {
        match venue {
            Venue::Aster => &self.aster,
            Venue::Lighter => &self.lighter,
        }
    }
}
