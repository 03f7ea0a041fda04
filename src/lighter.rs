// ─────────────────────────────────────────────────────────────────────────────
// lighter.rs — Lighter Venue Gateway
//
// zkLighter REST surface. Markets are keyed by base symbol with integer
// market ids; amount/price grids come from the venue's decimal counts.
// Trading endpoints submit nonce'd transactions authenticated with the
// account's API private key.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::LighterCredentials;
use crate::gateway::{
    aggressive_price, AccountBalance, MarginMode, MarketDescriptor, OpenPosition, OrderResult,
    PositionDetails, Quote, Side, Venue, VenueError, VenueGateway,
};

#[derive(Debug, Clone)]
struct LighterMarket {
    market_id: u32,
    price_tick: f64,
    amount_tick: f64,
}

pub struct LighterGateway {
    creds: LighterCredentials,
    client: reqwest::Client,
    markets: Mutex<HashMap<String, LighterMarket>>,
}

impl LighterGateway {
    pub fn new(creds: LighterCredentials) -> Self {
        Self {
            creds,
            client: reqwest::Client::new(),
            markets: Mutex::new(HashMap::new()),
        }
    }

    fn signer_key(&self) -> Result<&str, VenueError> {
        self.creds
            .api_private_key
            .as_deref()
            .ok_or_else(|| VenueError::MissingCredentials("LIGHTER_PRIVATE_KEY".to_string()))
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, VenueError> {
        let resp = self
            .client
            .get(format!("{}{}", self.creds.base_url, path))
            .query(params)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        read_json(resp).await
    }

    /// Authenticated transaction POST. The payload is canonicalized and
    /// countersigned with the API private key; the venue matches the
    /// signature against the registered key index.
    async fn send_tx(
        &self,
        tx_type: &str,
        mut tx: serde_json::Value,
    ) -> Result<serde_json::Value, VenueError> {
        let key = self.signer_key()?;
        let nonce = chrono::Utc::now().timestamp_millis();
        tx["account_index"] = serde_json::json!(self.creds.account_index);
        tx["api_key_index"] = serde_json::json!(self.creds.api_key_index);
        tx["nonce"] = serde_json::json!(nonce);

        let canonical = serde_json::to_string(&tx)
            .map_err(|e| VenueError::Api(e.to_string()))?;
        let signature = sign_hmac(key, &canonical)?;

        let body = serde_json::json!({
            "tx_type": tx_type,
            "tx_info": tx,
            "signature": signature,
        });
        let resp = self
            .client
            .post(format!("{}/api/v1/sendTx", self.creds.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        let data = read_json(resp).await?;
        if let Some(code) = data["code"].as_i64() {
            if code != 200 {
                let msg = data["message"].as_str().unwrap_or("sendTx rejected");
                return Err(VenueError::Api(format!("code {}: {}", code, msg)));
            }
        }
        Ok(data)
    }

    async fn market(&self, base_symbol: &str) -> Result<LighterMarket, VenueError> {
        if let Some(m) = self
            .markets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(base_symbol)
        {
            return Ok(m.clone());
        }

        log::info!("[LIGHTER] fetching order book metadata…");
        let data = self.get("/api/v1/orderBooks", &[]).await?;
        let mut loaded = 0usize;
        if let Some(books) = data["order_books"].as_array() {
            let mut markets = self.markets.lock().unwrap_or_else(|e| e.into_inner());
            for book in books {
                let symbol = match book["symbol"].as_str() {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let market_id = match book["market_id"].as_u64() {
                    Some(id) => id as u32,
                    None => continue,
                };
                let price_decimals = book["supported_price_decimals"].as_u64().unwrap_or(2);
                let size_decimals = book["supported_size_decimals"].as_u64().unwrap_or(4);
                markets.insert(
                    symbol,
                    LighterMarket {
                        market_id,
                        price_tick: 10_f64.powi(-(price_decimals as i32)),
                        amount_tick: 10_f64.powi(-(size_decimals as i32)),
                    },
                );
                loaded += 1;
            }
        }
        log::info!("[LIGHTER] loaded {} markets", loaded);

        self.markets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(base_symbol)
            .cloned()
            .ok_or_else(|| VenueError::Api(format!("unknown Lighter market {}", base_symbol)))
    }

    async fn account(&self) -> Result<serde_json::Value, VenueError> {
        let data = self
            .get(
                "/api/v1/account",
                &[("by", "index".to_string()), ("value", self.creds.account_index.to_string())],
            )
            .await?;
        data["accounts"]
            .as_array()
            .and_then(|a| a.first().cloned())
            .ok_or_else(|| VenueError::Api("account not found".to_string()))
    }

    /// Signed position size for one market, from the account snapshot.
    async fn position_for(&self, market_id: u32) -> Result<Option<serde_json::Value>, VenueError> {
        let account = self.account().await?;
        Ok(account["positions"]
            .as_array()
            .and_then(|rows| {
                rows.iter()
                    .find(|p| p["market_id"].as_u64() == Some(market_id as u64))
                    .cloned()
            }))
    }
}

fn signed_position_size(row: &serde_json::Value) -> f64 {
    let magnitude = num(&row["position"]).unwrap_or(0.0).abs();
    let sign = match row["sign"].as_i64() {
        Some(s) if s < 0 => -1.0,
        Some(_) => 1.0,
        // older payloads encode direction in the position value itself
        None => num(&row["position"]).unwrap_or(0.0).signum(),
    };
    magnitude * sign
}

#[async_trait]
impl VenueGateway for LighterGateway {
    fn venue(&self) -> Venue {
        Venue::Lighter
    }

    async fn market_descriptor(&self, base_symbol: &str) -> Result<MarketDescriptor, VenueError> {
        let m = self.market(base_symbol).await?;
        Ok(MarketDescriptor {
            market_id: m.market_id.to_string(),
            price_tick: m.price_tick,
            amount_tick: m.amount_tick,
        })
    }

    async fn best_bid_ask(&self, base_symbol: &str) -> Result<Quote, VenueError> {
        let m = self.market(base_symbol).await?;
        let data = self
            .get(
                "/api/v1/orderBookOrders",
                &[("market_id", m.market_id.to_string()), ("limit", "1".to_string())],
            )
            .await?;
        let top = |side: &str| -> Option<f64> {
            data[side]
                .as_array()
                .and_then(|rows| rows.first())
                .and_then(|row| num(&row["price"]))
                .filter(|p| *p > 0.0)
        };
        Ok(Quote { bid: top("bids"), ask: top("asks") })
    }

    async fn funding_rate(&self, base_symbol: &str) -> Result<f64, VenueError> {
        let m = self.market(base_symbol).await?;
        let data = self
            .get("/api/v1/funding-rates", &[("market_id", m.market_id.to_string())])
            .await?;
        data["funding_rates"]
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| num(&row["rate"]))
            .ok_or_else(|| VenueError::Api(format!("no funding rate for {}", base_symbol)))
    }

    async fn place_order(
        &self,
        base_symbol: &str,
        side: Side,
        size_base: f64,
        reference_price: f64,
        cross_ticks: u32,
    ) -> Result<OrderResult, VenueError> {
        let m = self.market(base_symbol).await?;
        let limit = aggressive_price(reference_price, m.price_tick, side, cross_ticks);

        // wire amounts are integer multiples of the venue's grids
        let base_amount = (size_base / m.amount_tick).round() as i64;
        let price_units = (limit / m.price_tick).round() as i64;
        if base_amount <= 0 {
            return Err(VenueError::Api(format!(
                "size {} rounds to zero lots on {}",
                size_base, base_symbol
            )));
        }

        let client_order_index = chrono::Utc::now().timestamp_millis();
        let tx = serde_json::json!({
            "market_index": m.market_id,
            "client_order_index": client_order_index,
            "base_amount": base_amount,
            "price": price_units,
            "is_ask": side == Side::Sell,
            "order_type": "immediate_or_cancel",
            "reduce_only": false,
        });
        let data = self.send_tx("create_order", tx).await?;
        let order_id = data["tx_hash"]
            .as_str()
            .map(|h| h.to_string())
            .unwrap_or_else(|| client_order_index.to_string());
        log::info!(
            "[LIGHTER] {} {:.6} {} @ {} accepted (tx {})",
            side.as_str(),
            size_base,
            base_symbol,
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
        let m = self.market(base_symbol).await?;
        let quote = self.best_bid_ask(base_symbol).await?;
        let reference = match side {
            Side::Sell => quote.bid.or(quote.ask),
            Side::Buy => quote.ask.or(quote.bid),
        }
        .ok_or_else(|| {
            VenueError::Api(format!("no reference price to close {}", base_symbol))
        })?;
        let limit = aggressive_price(reference, m.price_tick, side, 100);

        let base_amount = (size_base / m.amount_tick).round() as i64;
        let tx = serde_json::json!({
            "market_index": m.market_id,
            "client_order_index": chrono::Utc::now().timestamp_millis(),
            "base_amount": base_amount,
            "price": (limit / m.price_tick).round() as i64,
            "is_ask": side == Side::Sell,
            "order_type": "immediate_or_cancel",
            "reduce_only": true,
        });
        let data = self.send_tx("create_order", tx).await?;
        let order_id = data["tx_hash"].as_str().unwrap_or_default().to_string();
        Ok(OrderResult { order_id, limit_price: limit, size_base })
    }

    async fn open_size(&self, base_symbol: &str) -> Result<f64, VenueError> {
        let m = self.market(base_symbol).await?;
        Ok(self
            .position_for(m.market_id)
            .await?
            .map(|row| signed_position_size(&row))
            .unwrap_or(0.0))
    }

    async fn position_details(
        &self,
        base_symbol: &str,
    ) -> Result<Option<PositionDetails>, VenueError> {
        let m = self.market(base_symbol).await?;
        Ok(self.position_for(m.market_id).await?.map(|row| {
            let size = signed_position_size(&row);
            PositionDetails {
                side: if size > 0.0 { "LONG" } else { "SHORT" }.to_string(),
                size,
                entry_price: num(&row["avg_entry_price"]).unwrap_or(0.0),
                unrealized_pnl: num(&row["unrealized_pnl"]).unwrap_or(0.0),
                leverage: num(&row["leverage"]).unwrap_or(0.0),
                margin_mode: if row["margin_mode"].as_i64() == Some(1) {
                    MarginMode::Isolated
                } else {
                    MarginMode::Cross
                },
            }
        }))
    }

    async fn list_positions(&self) -> Result<Vec<OpenPosition>, VenueError> {
        let account = self.account().await?;
        let mut positions = Vec::new();
        for row in account["positions"].as_array().cloned().unwrap_or_default() {
            let size = signed_position_size(&row);
            if size.abs() < 1e-12 {
                continue;
            }
            positions.push(OpenPosition {
                symbol: row["symbol"].as_str().unwrap_or_default().to_string(),
                size,
                entry_price: num(&row["avg_entry_price"]).unwrap_or(0.0),
                unrealized_pnl: num(&row["unrealized_pnl"]).unwrap_or(0.0),
            });
        }
        Ok(positions)
    }

    async fn account_balance(&self) -> Result<AccountBalance, VenueError> {
        let account = self.account().await?;
        match (num(&account["total_asset_value"]), num(&account["available_balance"])) {
            (Some(total), Some(available)) => Ok(AccountBalance { total, available }),
            _ => Err(VenueError::Api("balance fields missing from account".to_string())),
        }
    }

    async fn set_leverage(
        &self,
        base_symbol: &str,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), VenueError> {
        let m = self.market(base_symbol).await?;
        let tx = serde_json::json!({
            "market_index": m.market_id,
            "leverage": leverage,
            "margin_mode": if margin_mode == MarginMode::Isolated { 1 } else { 0 },
        });
        self.send_tx("update_leverage", tx).await.map(|_| ())
    }

    async fn lot_step_size(&self, full_symbol: &str) -> Result<f64, VenueError> {
        // Lighter keys markets by base symbol ("BTC", not "BTCUSDT")
        let base = full_symbol.strip_suffix("USDT").unwrap_or(full_symbol);
        Ok(self.market(base).await?.amount_tick)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn num(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

fn sign_hmac(secret: &str, payload: &str) -> Result<String, VenueError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| VenueError::Auth(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, VenueError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(VenueError::RateLimited(format!("HTTP {}", status)));
    }
    let text = resp.text().await.map_err(|e| VenueError::Transport(e.to_string()))?;
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(VenueError::Auth(text));
    }
    if !status.is_success() {
        return Err(VenueError::Api(format!("HTTP {}: {}", status, text)));
    }
    serde_json::from_str(&text).map_err(|e| VenueError::Api(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_sign_prefers_explicit_field() {
        let short = serde_json::json!({"position": "0.002", "sign": -1});
        assert_eq!(signed_position_size(&short), -0.002);
        let long = serde_json::json!({"position": "0.002", "sign": 1});
        assert_eq!(signed_position_size(&long), 0.002);
    }

    #[test]
    fn position_sign_falls_back_to_value() {
        let legacy = serde_json::json!({"position": "-0.5"});
        assert_eq!(signed_position_size(&legacy), -0.5);
    }
}
