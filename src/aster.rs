// ─────────────────────────────────────────────────────────────────────────────
// aster.rs — Aster Venue Gateway
//
// Binance-compatible perp REST surface. Public endpoints are unsigned;
// trading and account endpoints sign the query string with the APIv1
// HMAC-SHA256 key pair.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AsterCredentials;
use crate::gateway::{
    aggressive_price, tick_decimals, AccountBalance, MarginMode, MarketDescriptor, OpenPosition,
    OrderResult, PositionDetails, Quote, Side, Venue, VenueError, VenueGateway,
};

const DEFAULT_BASE_URL: &str = "https://fapi.asterdex.com";
const RECV_WINDOW_MS: u64 = 5_000;

pub struct AsterGateway {
    base_url: String,
    quote: String,
    creds: AsterCredentials,
    client: reqwest::Client,
    // full symbol -> descriptor, filled from exchangeInfo on first use
    filters: Mutex<HashMap<String, MarketDescriptor>>,
}

impl AsterGateway {
    pub fn new(creds: AsterCredentials, quote: &str) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            quote: quote.to_string(),
            creds,
            client: reqwest::Client::new(),
            filters: Mutex::new(HashMap::new()),
        }
    }

    fn full_symbol(&self, base: &str) -> String {
        format!("{}{}", base, self.quote)
    }

    fn api_keys(&self) -> Result<(&str, &str), VenueError> {
        match (&self.creds.apiv1_public, &self.creds.apiv1_private) {
            (Some(public), Some(private)) => Ok((public, private)),
            _ => Err(VenueError::MissingCredentials(
                "ASTER_APIV1_PUBLIC / ASTER_APIV1_PRIVATE".to_string(),
            )),
        }
    }

    async fn get_public(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, VenueError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        read_json(resp).await
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, VenueError> {
        let (public, private) = self.api_keys()?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        query.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));
        query.push(("timestamp".to_string(), timestamp.to_string()));

        let canonical = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_hmac(private, &canonical)?;
        query.push(("signature".to_string(), signature));

        let resp = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-MBX-APIKEY", public)
            .query(&query)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        read_json(resp).await
    }

    async fn descriptor_for_full(&self, full: &str) -> Result<MarketDescriptor, VenueError> {
        if let Some(d) = self.filters.lock().unwrap_or_else(|e| e.into_inner()).get(full) {
            return Ok(d.clone());
        }

        log::info!("[ASTER] fetching exchangeInfo filters…");
        let data = self.get_public("/fapi/v1/exchangeInfo", &[]).await?;
        let mut loaded = 0usize;
        if let Some(symbols) = data["symbols"].as_array() {
            let mut filters = self.filters.lock().unwrap_or_else(|e| e.into_inner());
            for s in symbols {
                let name = match s["symbol"].as_str() {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let mut price_tick = None;
                let mut amount_tick = None;
                if let Some(fs) = s["filters"].as_array() {
                    for f in fs {
                        match f["filterType"].as_str() {
                            Some("PRICE_FILTER") => price_tick = num(&f["tickSize"]),
                            Some("LOT_SIZE") => amount_tick = num(&f["stepSize"]),
                            _ => {}
                        }
                    }
                }
                if let (Some(pt), Some(at)) = (price_tick, amount_tick) {
                    filters.insert(
                        name.clone(),
                        MarketDescriptor { market_id: name, price_tick: pt, amount_tick: at },
                    );
                    loaded += 1;
                }
            }
        }
        log::info!("[ASTER] loaded tick filters for {} markets", loaded);

        self.filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(full)
            .cloned()
            .ok_or_else(|| VenueError::Api(format!("unknown Aster market {}", full)))
    }

    async fn position_row(&self, full: &str) -> Result<Option<serde_json::Value>, VenueError> {
        let data = self
            .send_signed(
                reqwest::Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", full.to_string())],
            )
            .await?;
        let rows = data.as_array().cloned().unwrap_or_default();
        Ok(rows.into_iter().find(|row| {
            row["symbol"].as_str() == Some(full)
                && num(&row["positionAmt"]).map(|v| v.abs() > 1e-12).unwrap_or(false)
        }))
    }
}

#[async_trait]
impl VenueGateway for AsterGateway {
    fn venue(&self) -> Venue {
        Venue::Aster
    }

    async fn market_descriptor(&self, base_symbol: &str) -> Result<MarketDescriptor, VenueError> {
        self.descriptor_for_full(&self.full_symbol(base_symbol)).await
    }

    async fn best_bid_ask(&self, base_symbol: &str) -> Result<Quote, VenueError> {
        let full = self.full_symbol(base_symbol);
        let data = self
            .get_public("/fapi/v1/ticker/bookTicker", &[("symbol", full)])
            .await?;
        Ok(Quote {
            bid: num(&data["bidPrice"]).filter(|v| *v > 0.0),
            ask: num(&data["askPrice"]).filter(|v| *v > 0.0),
        })
    }

    async fn funding_rate(&self, base_symbol: &str) -> Result<f64, VenueError> {
        let full = self.full_symbol(base_symbol);
        let data = self
            .get_public("/fapi/v1/premiumIndex", &[("symbol", full.clone())])
            .await?;
        num(&data["lastFundingRate"])
            .ok_or_else(|| VenueError::Api(format!("no funding rate for {}", full)))
    }

    async fn place_order(
        &self,
        base_symbol: &str,
        side: Side,
        size_base: f64,
        reference_price: f64,
        cross_ticks: u32,
    ) -> Result<OrderResult, VenueError> {
        let full = self.full_symbol(base_symbol);
        let desc = self.descriptor_for_full(&full).await?;
        let limit = aggressive_price(reference_price, desc.price_tick, side, cross_ticks);

        let params = [
            ("symbol", full.clone()),
            ("side", binance_side(side).to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "IOC".to_string()),
            ("quantity", format_on_grid(size_base, desc.amount_tick)),
            ("price", format_on_grid(limit, desc.price_tick)),
        ];
        let data = self
            .send_signed(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await?;
        let order_id = data["orderId"]
            .as_u64()
            .map(|id| id.to_string())
            .ok_or_else(|| VenueError::Api(format!("order rejected: {}", data)))?;
        log::info!(
            "[ASTER] {} {} {} @ {} accepted (id {})",
            binance_side(side),
            size_base,
            full,
            limit,
            order_id
        );
        Ok(OrderResult { order_id, limit_price: limit, size_base })
    }

    async fn close_position(
        &self,
        base_symbol: &str,
        size_base: f64,
        side: Side,
    ) -> Result<OrderResult, VenueError> {
        let full = self.full_symbol(base_symbol);
        let desc = self.descriptor_for_full(&full).await?;
        let quote = self.best_bid_ask(base_symbol).await?;
        let reference = match side {
            Side::Sell => quote.bid.or(quote.ask),
            Side::Buy => quote.ask.or(quote.bid),
        }
        .ok_or_else(|| VenueError::Api(format!("no reference price to close {}", full)))?;
        let limit = aggressive_price(reference, desc.price_tick, side, 100);

        let params = [
            ("symbol", full.clone()),
            ("side", binance_side(side).to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "IOC".to_string()),
            ("reduceOnly", "true".to_string()),
            ("quantity", format_on_grid(size_base, desc.amount_tick)),
            ("price", format_on_grid(limit, desc.price_tick)),
        ];
        let data = self
            .send_signed(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await?;
        let order_id = data["orderId"]
            .as_u64()
            .map(|id| id.to_string())
            .ok_or_else(|| VenueError::Api(format!("close rejected: {}", data)))?;
        Ok(OrderResult { order_id, limit_price: limit, size_base })
    }

    async fn open_size(&self, base_symbol: &str) -> Result<f64, VenueError> {
        let full = self.full_symbol(base_symbol);
        Ok(self
            .position_row(&full)
            .await?
            .and_then(|row| num(&row["positionAmt"]))
            .unwrap_or(0.0))
    }

    async fn position_details(
        &self,
        base_symbol: &str,
    ) -> Result<Option<PositionDetails>, VenueError> {
        let full = self.full_symbol(base_symbol);
        Ok(self.position_row(&full).await?.map(|row| {
            let size = num(&row["positionAmt"]).unwrap_or(0.0);
            PositionDetails {
                side: if size > 0.0 { "LONG" } else { "SHORT" }.to_string(),
                size,
                entry_price: num(&row["entryPrice"]).unwrap_or(0.0),
                unrealized_pnl: num(&row["unRealizedProfit"]).unwrap_or(0.0),
                leverage: num(&row["leverage"]).unwrap_or(0.0),
                margin_mode: if row["marginType"].as_str() == Some("isolated") {
                    MarginMode::Isolated
                } else {
                    MarginMode::Cross
                },
            }
        }))
    }

    async fn list_positions(&self) -> Result<Vec<OpenPosition>, VenueError> {
        let data = self
            .send_signed(reqwest::Method::GET, "/fapi/v2/positionRisk", &[])
            .await?;
        let mut positions = Vec::new();
        for row in data.as_array().cloned().unwrap_or_default() {
            let size = num(&row["positionAmt"]).unwrap_or(0.0);
            if size.abs() < 1e-12 {
                continue;
            }
            let symbol = row["symbol"].as_str().unwrap_or_default();
            positions.push(OpenPosition {
                symbol: symbol.strip_suffix(self.quote.as_str()).unwrap_or(symbol).to_string(),
                size,
                entry_price: num(&row["entryPrice"]).unwrap_or(0.0),
                unrealized_pnl: num(&row["unRealizedProfit"]).unwrap_or(0.0),
            });
        }
        Ok(positions)
    }

    async fn account_balance(&self) -> Result<AccountBalance, VenueError> {
        let data = self
            .send_signed(reqwest::Method::GET, "/fapi/v2/account", &[])
            .await?;
        match (num(&data["totalWalletBalance"]), num(&data["availableBalance"])) {
            (Some(total), Some(available)) => Ok(AccountBalance { total, available }),
            _ => Err(VenueError::Api("balance fields missing from account response".to_string())),
        }
    }

    async fn set_leverage(
        &self,
        base_symbol: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), VenueError> {
        let full = self.full_symbol(base_symbol);

        // marginType errors out when already set; that response is fine.
        let margin = self
            .send_signed(
                reqwest::Method::POST,
                "/fapi/v1/marginType",
                &[
                    ("symbol", full.clone()),
                    ("marginType", margin_mode.as_str().to_uppercase()),
                ],
            )
            .await;
        if let Err(e) = margin {
            if !format!("{}", e).contains("No need to change") {
                log::warn!("[ASTER] marginType for {}: {}", full, e);
            }
        }

        self.send_signed(
            reqwest::Method::POST,
            "/fapi/v1/leverage",
            &[("symbol", full), ("leverage", leverage.to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn lot_step_size(&self, full_symbol: &str) -> Result<f64, VenueError> {
        Ok(self.descriptor_for_full(full_symbol).await?.amount_tick)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn binance_side(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

/// Accepts both JSON numbers and the string-encoded numbers Binance-
/// style APIs favor.
fn num(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

/// Renders a value with exactly the tick's precision ("0.002", "50050.0").
fn format_on_grid(value: f64, tick: f64) -> String {
    format!("{:.*}", tick_decimals(tick), value)
}

fn sign_hmac(secret: &str, payload: &str) -> Result<String, VenueError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| VenueError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, VenueError> {
    let status = resp.status();
    if status.as_u16() == 429 || status.as_u16() == 418 {
        return Err(VenueError::RateLimited(format!("HTTP {}", status)));
    }
    let text = resp.text().await.map_err(|e| VenueError::Transport(e.to_string()))?;
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(VenueError::Auth(text));
    }
    if !status.is_success() {
        return Err(VenueError::Api(format!("HTTP {}: {}", status, text)));
    }
    let data: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| VenueError::Api(e.to_string()))?;
    // some endpoints report errors with 200 + {"code": <0, "msg": ...}
    if let (Some(code), Some(msg)) = (data["code"].as_i64(), data["msg"].as_str()) {
        if code < 0 {
            return Err(VenueError::Api(format!("code {}: {}", code, msg)));
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_formatting_matches_tick_precision() {
        assert_eq!(format_on_grid(0.002, 0.001), "0.002");
        assert_eq!(format_on_grid(50_050.0, 0.5), "50050.0");
        assert_eq!(format_on_grid(7.0, 1.0), "7");
    }

    #[test]
    fn hmac_signature_is_stable_hex() {
        let sig = sign_hmac("secret", "symbol=BTCUSDT&timestamp=1").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, sign_hmac("secret", "symbol=BTCUSDT&timestamp=1").unwrap());
    }

    #[test]
    fn numbers_parse_from_either_encoding() {
        assert_eq!(num(&serde_json::json!("0.0001")), Some(0.0001));
        assert_eq!(num(&serde_json::json!(0.5)), Some(0.5));
        assert_eq!(num(&serde_json::json!(null)), None);
    }
}
