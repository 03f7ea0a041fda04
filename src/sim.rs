// ─────────────────────────────────────────────────────────────────────────────
// sim.rs — In-Memory Venue
//
// A scriptable VenueGateway used by the test suites: seed descriptors,
// quotes, funding rates and positions, then inject failures per call.
// Orders fill instantly at their reference price.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gateway::{
    AccountBalance, MarginMode, MarketDescriptor, OpenPosition, OrderResult, PositionDetails,
    Quote, Side, Venue, VenueError, VenueGateway,
};

#[derive(Debug, Clone)]
struct SimPosition {
    size: f64, // signed, positive = long
    entry_price: f64,
    unrealized_pnl: f64,
    leverage: f64,
}

#[derive(Default)]
struct SimState {
    descriptors: HashMap<String, MarketDescriptor>,
    quotes: HashMap<String, Quote>,
    funding: HashMap<String, f64>,
    positions: HashMap<String, SimPosition>,
    balance: Option<AccountBalance>,
    leverage_set: HashMap<String, u32>,
    // scripted failures, consumed FIFO per call site
    fail_place: Vec<VenueError>,
    fail_close: Vec<VenueError>,
    fail_funding: Vec<VenueError>,
    fail_quote: Vec<VenueError>,
    order_seq: u64,
    orders_placed: Vec<(String, Side, f64)>,
}

pub struct SimVenue {
    venue: Venue,
    state: Mutex<SimState>,
}

impl SimVenue {
    pub fn new(venue: Venue) -> Self {
        Self { venue, state: Mutex::new(SimState::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed_market(&self, symbol: &str, price_tick: f64, amount_tick: f64) {
        self.lock().descriptors.insert(
            symbol.to_string(),
            MarketDescriptor {
                market_id: format!("{}-{}", self.venue.label().to_lowercase(), symbol),
                price_tick,
                amount_tick,
            },
        );
    }

    pub fn seed_quote(&self, symbol: &str, bid: f64, ask: f64) {
        self.lock()
            .quotes
            .insert(symbol.to_string(), Quote { bid: Some(bid), ask: Some(ask) });
    }

    pub fn seed_funding(&self, symbol: &str, rate: f64) {
        self.lock().funding.insert(symbol.to_string(), rate);
    }

    pub fn seed_balance(&self, total: f64, available: f64) {
        self.lock().balance = Some(AccountBalance { total, available });
    }

    pub fn seed_position(&self, symbol: &str, size: f64, entry_price: f64) {
        self.lock().positions.insert(
            symbol.to_string(),
            SimPosition { size, entry_price, unrealized_pnl: 0.0, leverage: 3.0 },
        );
    }

    pub fn set_unrealized_pnl(&self, symbol: &str, pnl: f64) {
        if let Some(pos) = self.lock().positions.get_mut(symbol) {
            pos.unrealized_pnl = pnl;
        }
    }

    /// Queues an error for the next place_order call.
    pub fn fail_next_place(&self, err: VenueError) {
        self.lock().fail_place.push(err);
    }

    pub fn fail_next_close(&self, err: VenueError) {
        self.lock().fail_close.push(err);
    }

    /// Queues `n` rate-limit errors ahead of funding-rate fetches.
    pub fn rate_limit_funding(&self, n: usize) {
        let mut st = self.lock();
        for _ in 0..n {
            st.fail_funding.push(VenueError::RateLimited("simulated 429".to_string()));
        }
    }

    pub fn fail_next_quote(&self, err: VenueError) {
        self.lock().fail_quote.push(err);
    }

    pub fn signed_size(&self, symbol: &str) -> f64 {
        self.lock().positions.get(symbol).map(|p| p.size).unwrap_or(0.0)
    }

    pub fn orders_placed(&self) -> Vec<(String, Side, f64)> {
        self.lock().orders_placed.clone()
    }

    pub fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.lock().leverage_set.get(symbol).copied()
    }

    fn descriptor(&self, symbol: &str) -> Result<MarketDescriptor, VenueError> {
        self.lock()
            .descriptors
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::Api(format!("unknown market {}", symbol)))
    }
}

#[async_trait]
impl VenueGateway for SimVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn market_descriptor(&self, base_symbol: &str) -> Result<MarketDescriptor, VenueError> {
        self.descriptor(base_symbol)
    }

    async fn best_bid_ask(&self, base_symbol: &str) -> Result<Quote, VenueError> {
        let mut st = self.lock();
        if !st.fail_quote.is_empty() {
            return Err(st.fail_quote.remove(0));
        }
        st.quotes
            .get(base_symbol)
            .copied()
            .ok_or_else(|| VenueError::Api(format!("no book for {}", base_symbol)))
    }

    async fn funding_rate(&self, base_symbol: &str) -> Result<f64, VenueError> {
        let mut st = self.lock();
        if !st.fail_funding.is_empty() {
            return Err(st.fail_funding.remove(0));
        }
        st.funding
            .get(base_symbol)
            .copied()
            .ok_or_else(|| VenueError::Api(format!("no funding for {}", base_symbol)))
    }

    async fn place_order(
        &self,
        base_symbol: &str,
        side: Side,
        size_base: f64,
        reference_price: f64,
        _cross_ticks: u32,
    ) -> Result<OrderResult, VenueError> {
        let mut st = self.lock();
        if !st.fail_place.is_empty() {
            return Err(st.fail_place.remove(0));
        }
        st.order_seq += 1;
        let order_id = format!("sim-{}", st.order_seq);
        st.orders_placed.push((base_symbol.to_string(), side, size_base));

        let signed = match side {
            Side::Buy => size_base,
            Side::Sell => -size_base,
        };
        let entry = st
            .quotes
            .get(base_symbol)
            .and_then(|q| q.mid())
            .unwrap_or(reference_price);
        let pos = st
            .positions
            .entry(base_symbol.to_string())
            .or_insert(SimPosition { size: 0.0, entry_price: entry, unrealized_pnl: 0.0, leverage: 3.0 });
        pos.size += signed;
        if pos.size.abs() < 1e-12 {
            st.positions.remove(base_symbol);
        }

        Ok(OrderResult { order_id, limit_price: reference_price, size_base })
    }

    async fn close_position(
        &self,
        base_symbol: &str,
        size_base: f64,
        side: Side,
    ) -> Result<OrderResult, VenueError> {
        {
            let mut st = self.lock();
            if !st.fail_close.is_empty() {
                return Err(st.fail_close.remove(0));
            }
        }
        let reference = {
            let st = self.lock();
            st.quotes.get(base_symbol).and_then(|q| q.mid()).unwrap_or(0.0)
        };
        self.place_order(base_symbol, side, size_base, reference, 0).await
    }

    async fn open_size(&self, base_symbol: &str) -> Result<f64, VenueError> {
        Ok(self.signed_size(base_symbol))
    }

    async fn position_details(
        &self,
        base_symbol: &str,
    ) -> Result<Option<PositionDetails>, VenueError> {
        Ok(self.lock().positions.get(base_symbol).map(|p| PositionDetails {
            side: if p.size > 0.0 { "LONG" } else { "SHORT" }.to_string(),
            size: p.size,
            entry_price: p.entry_price,
            unrealized_pnl: p.unrealized_pnl,
            leverage: p.leverage,
            margin_mode: MarginMode::Cross,
        }))
    }

    async fn list_positions(&self) -> Result<Vec<OpenPosition>, VenueError> {
        Ok(self
            .lock()
            .positions
            .iter()
            .filter(|(_, p)| p.size.abs() > 1e-12)
            .map(|(symbol, p)| OpenPosition {
                symbol: symbol.clone(),
                size: p.size,
                entry_price: p.entry_price,
                unrealized_pnl: p.unrealized_pnl,
            })
            .collect())
    }

    async fn account_balance(&self) -> Result<AccountBalance, VenueError> {
        self.lock()
            .balance
            .ok_or_else(|| VenueError::Api("no balance seeded".to_string()))
    }

    async fn set_leverage(
        &self,
        base_symbol: &str,
        leverage: u32,
        _margin_mode: MarginMode,
    ) -> Result<(), VenueError> {
        self.lock().leverage_set.insert(base_symbol.to_string(), leverage);
        Ok(())
    }

    async fn lot_step_size(&self, full_symbol: &str) -> Result<f64, VenueError> {
        // sim markets are keyed by base symbol; strip a known quote tail
        let base = full_symbol.trim_end_matches("USDT");
        Ok(self.descriptor(base)?.amount_tick)
    }
}
