use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Shared Models ─────────────────────────────────────────────────

/// The two perpetual venues this engine rotates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Aster,
    Lighter,
}

impl Venue {
    /// Funding periods per day: Aster pays every 4h, Lighter every 8h.
    pub fn periods_per_day(&self) -> f64 {
        match self {
            Venue::Aster => 6.0,
            Venue::Lighter => 3.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Venue::Aster => "Aster",
            Venue::Lighter => "Lighter",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl MarginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Cross => "cross",
            MarginMode::Isolated => "isolated",
        }
    }
}

/// Top-of-book snapshot. Either side may be empty on a thin book.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quote {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl Quote {
    /// Mid price: average of bid and ask when both exist, otherwise
    /// whichever side is present.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

/// Per-venue market metadata. `price_tick` and `amount_tick` fix the
/// quantization grid every order must lie on.
#[derive(Debug, Clone)]
pub struct MarketDescriptor {
    pub market_id: String,
    pub price_tick: f64,
    pub amount_tick: f64,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub limit_price: f64,
    pub size_base: f64,
}

/// Detailed single-market position view (inspector tool).
#[derive(Debug, Clone)]
pub struct PositionDetails {
    pub side: String,
    pub size: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub margin_mode: MarginMode,
}

/// One open position as listed by a venue. `size` is signed
/// (positive = long).
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: String,
    pub size: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AccountBalance {
    pub total: f64,
    pub available: f64,
}

// ─── Errors ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum VenueError {
    Transport(String),
    Api(String),
    Auth(String),
    RateLimited(String),
    Timeout(String),
    MissingCredentials(String),
}

impl VenueError {
    /// True when this error should trigger the governor's backoff path.
    /// The typed variant is preferred; the substring match remains for
    /// opaque SDK/transport error text.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            VenueError::RateLimited(_) => true,
            VenueError::Transport(s) | VenueError::Api(s) => looks_rate_limited(s),
            _ => false,
        }
    }
}

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VenueError::Transport(s) => write!(f, "transport error: {}", s),
            VenueError::Api(s) => write!(f, "venue API error: {}", s),
            VenueError::Auth(s) => write!(f, "auth error: {}", s),
            VenueError::RateLimited(s) => write!(f, "rate limited: {}", s),
            VenueError::Timeout(s) => write!(f, "timed out: {}", s),
            VenueError::MissingCredentials(s) => write!(f, "missing credentials: {}", s),
        }
    }
}

impl std::error::Error for VenueError {}

/// Case-insensitive rate-limit sniffing over raw error text.
pub fn looks_rate_limited(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("ratelimit")
}

// ─── Venue Gateway Trait ───────────────────────────────────────────

/// The capability set the engine depends on. Both live venues and the
/// in-memory sim implement this; nothing above this trait knows venue
/// wire formats.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    fn venue(&self) -> Venue;

    async fn market_descriptor(&self, base_symbol: &str) -> Result<MarketDescriptor, VenueError>;

    async fn best_bid_ask(&self, base_symbol: &str) -> Result<Quote, VenueError>;

    /// Most recent funding-period rate as a plain decimal (e.g. 0.0001).
    async fn funding_rate(&self, base_symbol: &str) -> Result<f64, VenueError>;

    /// Places an aggressive limit order crossing the book by `cross_ticks`
    /// ticks, approximating a market fill while staying on the tick grid.
    async fn place_order(
        &self,
        base_symbol: &str,
        side: Side,
        size_base: f64,
        reference_price: f64,
        cross_ticks: u32,
    ) -> Result<OrderResult, VenueError>;

    /// Reduce-only aggressive close of `size_base` on the given side.
    async fn close_position(
        &self,
        base_symbol: &str,
        size_base: f64,
        side: Side,
    ) -> Result<OrderResult, VenueError>;

    /// Signed open size for one market (0.0 when flat).
    async fn open_size(&self, base_symbol: &str) -> Result<f64, VenueError>;

    async fn position_details(
        &self,
        base_symbol: &str,
    ) -> Result<Option<PositionDetails>, VenueError>;

    /// All open positions on the venue (inspector / emergency tools).
    async fn list_positions(&self) -> Result<Vec<OpenPosition>, VenueError>;

    async fn account_balance(&self) -> Result<AccountBalance, VenueError>;

    async fn set_leverage(
        &self,
        base_symbol: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), VenueError>;

    /// Lot-size filter for a venue-native full symbol (e.g. "BTCUSDT").
    async fn lot_step_size(&self, full_symbol: &str) -> Result<f64, VenueError>;
}

// ─── Tick Helpers ──────────────────────────────────────────────────

/// Number of decimal places implied by a tick (0.001 -> 3).
pub fn tick_decimals(tick: f64) -> usize {
    let mut d = 0usize;
    let mut t = tick;
    while d < 12 && (t - t.round()).abs() > 1e-9 {
        t *= 10.0;
        d += 1;
    }
    d
}

pub fn round_f64(val: f64, decimals: usize) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (val * factor).round() / factor
}

/// Largest multiple of `tick` not exceeding `value`, snapped to the
/// tick's decimal precision to shed float noise.
pub fn floor_to_tick(value: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    let steps = (value / tick + 1e-9).floor();
    round_f64(steps * tick, tick_decimals(tick))
}

/// Nearest on-grid price.
pub fn round_to_tick(value: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    let steps = (value / tick).round();
    round_f64(steps * tick, tick_decimals(tick))
}

/// Limit price crossed `cross_ticks` ticks beyond the reference in the
/// taking direction, clamped to stay positive and on the grid.
pub fn aggressive_price(reference: f64, price_tick: f64, side: Side, cross_ticks: u32) -> f64 {
    let offset = price_tick * cross_ticks as f64;
    let raw = match side {
        Side::Buy => reference + offset,
        Side::Sell => (reference - offset).max(price_tick),
    };
    round_to_tick(raw, price_tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_prefers_both_sides() {
        let q = Quote { bid: Some(100.0), ask: Some(102.0) };
        assert_eq!(q.mid(), Some(101.0));
    }

    #[test]
    fn mid_falls_back_to_single_side() {
        assert_eq!(Quote { bid: Some(99.0), ask: None }.mid(), Some(99.0));
        assert_eq!(Quote { bid: None, ask: Some(101.0) }.mid(), Some(101.0));
        assert_eq!(Quote::default().mid(), None);
    }

    #[test]
    fn rate_limit_sniffing() {
        assert!(looks_rate_limited("HTTP 429 returned"));
        assert!(looks_rate_limited("Too Many Requests"));
        assert!(looks_rate_limited("hit the RATE LIMIT"));
        assert!(looks_rate_limited("upstream ratelimit tripped"));
        assert!(!looks_rate_limited("connection refused"));
    }

    #[test]
    fn typed_rate_limit_beats_substring() {
        assert!(VenueError::RateLimited("".into()).is_rate_limit());
        assert!(VenueError::Api("got 429".into()).is_rate_limit());
        assert!(!VenueError::Timeout("slow".into()).is_rate_limit());
        assert!(!VenueError::Transport("dns failure".into()).is_rate_limit());
    }

    #[test]
    fn tick_flooring() {
        assert_eq!(floor_to_tick(0.0029, 0.001), 0.002);
        assert_eq!(floor_to_tick(0.003, 0.001), 0.003);
        assert_eq!(floor_to_tick(123.456, 0.5), 123.0);
        assert_eq!(tick_decimals(0.001), 3);
        assert_eq!(tick_decimals(1.0), 0);
    }

    #[test]
    fn aggressive_prices_cross_the_book() {
        // buy crosses up, sell crosses down, both stay on grid
        assert_eq!(aggressive_price(50_000.0, 0.5, Side::Buy, 100), 50_050.0);
        assert_eq!(aggressive_price(50_000.0, 0.5, Side::Sell, 100), 49_950.0);
        // sell never goes to zero or below
        let p = aggressive_price(0.01, 0.01, Side::Sell, 100);
        assert!(p >= 0.01);
    }
}
